use axum::{
    Router,
    routing::{get, post, put},
};

pub mod events;
pub mod registrations;
pub mod system;

/// Endpoints open to anonymous callers. A valid token, when present, still
/// attaches the principal (used for `isRegistered`).
pub fn public_router() -> Router {
    Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .route("/events", get(events::list_events))
        .route("/events/:id", get(events::get_event))
}

/// Endpoints that require a bearer token.
pub fn protected_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/events", post(events::create_event))
        .route(
            "/events/:id",
            put(events::update_event).delete(events::archive_event),
        )
        .route("/events/:id/reconcile", post(events::reconcile_event))
        .nest("/registrations", registrations::router())
}

