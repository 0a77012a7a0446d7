//! Core - configuration, state, lifecycle and the server loop
//!
//! # Structure
//!
//! - [`Config`] - environment-driven configuration
//! - [`AgentState`] - every component, wired once
//! - [`Server`] - background tasks, HTTP surface, stop handling
//! - [`Lifecycle`] - graceful and emergency stop requests
//! - [`BackgroundTasks`] - registry of spawned tasks
//! - [`AgentError`] - startup and fatal errors

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod server;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use error::{AgentError, FailureKind, Result, classify_failure};
pub use lifecycle::{Lifecycle, StopKind, StopRequest};
pub use server::{RunOutcome, Server};
pub use state::{AgentDeps, AgentState, Bootstrap};
pub use tasks::{BackgroundTasks, TaskKind, TaskMonitor};
