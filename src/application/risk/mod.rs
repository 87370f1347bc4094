pub mod adaptive_stop;
pub mod fee_gate;
pub mod position_sizer;
