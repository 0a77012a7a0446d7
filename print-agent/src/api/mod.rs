//! Local HTTP surface
//!
//! # Structure
//!
//! - [`health`] - health, readiness and metrics
//! - [`printers`] - printer set, reachability, test pages
//! - [`print`] - local job submission
//! - [`service`] - service info, restart and log tail
//!
//! Every route except `/health` and `/ready` sits behind the rate limiter.

pub mod health;
pub mod print;
pub mod printers;
pub mod service;

use axum::{Router, http::HeaderName, middleware};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::core::AgentState;
use crate::resilience::rate_limit;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Route table without middleware or state
pub fn build_router() -> Router<AgentState> {
    Router::new()
        .merge(health::router())
        .merge(printers::router())
        .merge(print::router())
        .merge(service::router())
}

/// Fully configured application, shared by the server and in-process calls
pub fn build_app(state: AgentState) -> Router {
    build_router()
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            REQUEST_ID_HEADER,
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static(REQUEST_ID_HEADER),
            MakeRequestUuid,
        ))
        .layer(CorsLayer::permissive())
}
