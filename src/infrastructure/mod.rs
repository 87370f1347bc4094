pub mod binance;
pub mod core;
pub mod mock;
pub mod notification;
pub mod paper;
pub mod persistence;
