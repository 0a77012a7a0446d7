//! Shared types for the printer fleet agent
//!
//! Common types used by the agent and anything that talks to it:
//! printer and job models, the sync-channel event vocabulary,
//! the unified error system and the HTTP response envelope.

pub mod error;
pub mod message;
pub mod models;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use message::{InboundEvent, OutboundEvent, SyncEnvelope};
