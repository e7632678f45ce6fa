//! Build record routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::master::MasterProcess;

pub fn routes() -> Router<Arc<MasterProcess>> {
    Router::new()
        .route("/builds", get(list_builds))
        .route("/builds/{id}", get(get_build))
}

async fn list_builds(State(master): State<Arc<MasterProcess>>) -> Json<serde_json::Value> {
    let builds = master.builds();
    Json(serde_json::json!({
        "builds": builds,
        "total": builds.len(),
    }))
}

/// GET /api/builds/{id}
async fn get_build(
    State(master): State<Arc<MasterProcess>>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match master.build(id) {
        Some(build) => (StatusCode::OK, Json(serde_json::json!(build))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Build {} not found", id) })),
        ),
    }
}
