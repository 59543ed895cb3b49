use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde_json::json;

use evently_registration::RegistrationStatus;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register))
        .route("/my", get(list_mine))
        .route("/event/:event_id", get(list_for_event))
        .route("/:id", delete(cancel))
}

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let body: dto::RegisterRequest = match dto::from_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let event_id = match dto::parse_event_id(&body.event_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.register(principal.user_id(), event_id).await {
        Ok(registration) => {
            let message = match registration.status() {
                RegistrationStatus::Waitlisted => "Added to waitlist",
                _ => "Registration successful",
            };
            (
                StatusCode::CREATED,
                Json(json!({ "message": message, "registration": registration })),
            )
                .into_response()
        }
        Err(e) => errors::registration_error_response(e),
    }
}

/// `DELETE /registrations/:id` with an optional `{"reason": ".."}` body.
pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelRequest>>,
) -> axum::response::Response {
    let registration_id = match dto::parse_registration_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);

    match services
        .engine
        .cancel(registration_id, principal.user_id(), reason.as_deref())
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "message": "Registration cancelled",
                "registration": outcome.cancelled,
                "promoted": outcome.promoted,
            })),
        )
            .into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}

pub async fn list_mine(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.engine.list_mine(principal.user_id()).await {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}

pub async fn list_for_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(event_id): Path<String>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&event_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine
        .list_for_event(event_id, principal.user_id(), principal.role())
        .await
    {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}
