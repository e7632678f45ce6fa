//! HTTP control API.

pub mod builds;
pub mod control;
pub mod services;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Json, Router};
use foreman_core::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::master::MasterProcess;

/// Build the main Axum router with all routes.
pub fn build_router(master: Arc<MasterProcess>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(master)
}

fn api_routes() -> Router<Arc<MasterProcess>> {
    Router::new()
        .merge(services::routes())
        .merge(control::routes())
        .merge(builds::routes())
}

/// Map a master error onto a JSON error response.
pub(crate) fn error_response(e: &Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Reconfig(_) => StatusCode::CONFLICT,
        Error::Config(_) | Error::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}
