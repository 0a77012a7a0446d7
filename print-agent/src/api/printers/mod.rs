//! Printer routes
//!
//! | Path | Method | Description |
//! |------|--------|-------------|
//! | /printers | GET | current printer set |
//! | /printers/status | GET | live reachability of every printer |
//! | /printers/{id}/test | POST | print a test page and wait for the result |

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::AgentState;

pub fn router() -> Router<AgentState> {
    Router::new()
        .route("/printers", get(handler::list))
        .route("/printers/status", get(handler::status))
        .route("/printers/{id}/test", post(handler::test))
}
