use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};

use evently_catalog::{EventDetailsPatch, NewEvent};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub async fn list_events(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::ListEventsParams>,
) -> axum::response::Response {
    let query = match params.into_query() {
        Ok(q) => q,
        Err(resp) => return resp,
    };

    match services.catalog.list_events(&query).await {
        Ok(page) => (StatusCode::OK, Json(dto::event_page_to_json(page))).into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}

/// Anonymous callers are welcome; with a token, `isRegistered` reflects the
/// caller's own registration.
pub async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let viewer = principal.as_ref().map(|Extension(p)| (p.user_id(), p.role()));
    match services.catalog.view_event(event_id, viewer).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}

pub async fn create_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let body: NewEvent = match dto::from_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .catalog
        .create_event(principal.user_id(), principal.role(), body)
        .await
    {
        Ok(event) => (StatusCode::CREATED, Json(event)).into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}

pub async fn update_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body: EventDetailsPatch = match dto::from_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .catalog
        .update_event(event_id, principal.user_id(), principal.role(), body)
        .await
    {
        Ok(event) => (StatusCode::OK, Json(event)).into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}

pub async fn archive_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .catalog
        .archive_event(event_id, principal.user_id(), principal.role())
        .await
    {
        Ok(event) => (
            StatusCode::OK,
            Json(serde_json::json!({ "message": "Event archived", "event": event })),
        )
            .into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}

pub async fn reconcile_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine
        .reconcile(event_id, principal.user_id(), principal.role())
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::registration_error_response(e),
    }
}
