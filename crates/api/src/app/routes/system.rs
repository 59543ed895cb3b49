use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Evently API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "events": "/events",
            "registrations": "/registrations",
            "health": "/health",
        },
    }))
}

/// Liveness plus a round trip to the storage backend.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let backend = services.ledger.backend();
    match services.ledger.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "storage": backend })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, backend, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "storage": backend })),
            )
                .into_response()
        }
    }
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    Json(json!({
        "userId": principal.user_id().to_string(),
        "role": principal.role().as_str(),
    }))
}
