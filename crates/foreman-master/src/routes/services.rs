//! Named service routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::master::MasterProcess;

pub fn routes() -> Router<Arc<MasterProcess>> {
    Router::new()
        .route("/services", get(list_services))
        .route("/services/{name}", get(get_service))
}

/// GET /api/services: every active service in configuration order.
async fn list_services(State(master): State<Arc<MasterProcess>>) -> Json<serde_json::Value> {
    let registry = master.registry();
    let services = registry.statuses();
    Json(serde_json::json!({
        "generation": registry.generation(),
        "services": services,
        "total": services.len(),
    }))
}

/// GET /api/services/{name}: one service, resolved now.
async fn get_service(
    State(master): State<Arc<MasterProcess>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match master.named_service(&name) {
        Some(instance) => (StatusCode::OK, Json(serde_json::json!(instance.status()))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("No service named '{}'", name) })),
        ),
    }
}
