//! Utility module
//!
//! - [`logger`] - tracing setup, log retention, log tail

pub mod logger;

pub use logger::{cleanup_old_logs, init_logger, tail_log};
