//! Data models
//!
//! Shared between the print agent and the backend (via the sync channel and
//! the local HTTP surface). Field names serialize as camelCase on the wire.

pub mod device;
pub mod job;
pub mod printer;

// Re-exports
pub use device::*;
pub use job::*;
pub use printer::*;
