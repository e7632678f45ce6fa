//! Reconfiguration and scheduler control routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;

use super::error_response;
use crate::master::MasterProcess;

pub fn routes() -> Router<Arc<MasterProcess>> {
    Router::new()
        .route("/reconfig", post(reconfig))
        .route("/forceschedulers/{name}/force", post(force))
}

/// POST /api/reconfig: reload the configuration file.
///
/// Answers 409 if a reload is already running.
async fn reconfig(State(master): State<Arc<MasterProcess>>) -> impl IntoResponse {
    info!("Reconfiguration requested over HTTP");
    match master.try_reconfig().await {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))),
        Err(e) => error_response(&e),
    }
}

/// POST /api/forceschedulers/{name}/force: start builds now.
async fn force(
    State(master): State<Arc<MasterProcess>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match master.force(&name) {
        Ok(ids) => (
            StatusCode::OK,
            Json(serde_json::json!({ "scheduler": name, "builds": ids })),
        ),
        Err(e) => error_response(&e),
    }
}
