//! Local print submission

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::AgentState;

pub fn router() -> Router<AgentState> {
    Router::new()
        .route("/print", post(handler::submit))
        .route("/print/jobs/{id}", get(handler::job))
}
