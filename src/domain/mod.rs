// Market data domain (timeframes)
pub mod market;

// Performance tracking domain
pub mod performance;

// Port interfaces
pub mod ports;

// Core trading domain
pub mod trading;

// Domain-specific error types
pub mod errors;
