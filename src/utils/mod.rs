//! # Utility Modules
//!
//! Supporting utilities for logging, metrics and cancellable I/O.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Cancellable reads and async timeout wrappers

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use timeout::ReadControl;
