//! Service control routes
//!
//! | Path | Method | Description |
//! |------|--------|-------------|
//! | /service/info | GET | identity, uptime, host |
//! | /service/restart | POST | graceful stop, the supervisor restarts us |
//! | /service/logs | GET | tail of the newest application log |

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::AgentState;

pub fn router() -> Router<AgentState> {
    Router::new()
        .route("/service/info", get(handler::info))
        .route("/service/restart", post(handler::restart))
        .route("/service/logs", get(handler::logs))
}
