//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the editor websocket and the read-only plan endpoints
//! under a single Axum router. Editors speak frames over `/api/ws`; export
//! and reporting collaborators read plan state over plain HTTP.

pub mod plans;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/plans/{id}/tables", get(plans::list_tables))
        .route("/api/plans/{id}/conflicts", get(plans::list_conflicts))
        .route("/api/plans/{id}/presence", get(plans::list_presence))
        .route("/api/plans/{id}/recommendations", get(plans::recommendations))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
