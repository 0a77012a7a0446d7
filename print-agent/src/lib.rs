//! Print Agent - printer fleet agent for point-of-sale branches
//!
//! # Overview
//!
//! Runs on a branch machine next to the printers. It finds them (spool
//! queues, USB, LAN, Bluetooth), keeps a durable map of USB devices across
//! hot-plug, runs print jobs one at a time per printer, watches its own
//! health and stays connected to the backend over a WebSocket sync channel.
//!
//! # Layout
//!
//! ```text
//! print-agent/src/
//! ├── core/         # config, state, lifecycle, background tasks, server
//! ├── resilience/   # circuit breaker, rate limiter, connection pool
//! ├── discovery/    # sub-scans, classification, printer registry
//! ├── usb/          # device enumeration and persistence
//! ├── printing/     # job queue, dispatcher, executors
//! ├── health/       # checks, recovery, readiness
//! ├── sync/         # backend channel, command handler, registration
//! ├── shutdown/     # phased shutdown and emergency dump
//! ├── storage/      # JSON state files
//! ├── api/          # local HTTP surface
//! └── utils/        # logging
//! ```

pub mod api;
pub mod core;
pub mod discovery;
pub mod health;
pub mod printing;
pub mod resilience;
pub mod shutdown;
pub mod storage;
pub mod sync;
pub mod usb;
pub mod utils;

pub use core::{AgentDeps, AgentState, Config, RunOutcome, Server};
pub use shared::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use utils::{cleanup_old_logs, init_logger, tail_log};
