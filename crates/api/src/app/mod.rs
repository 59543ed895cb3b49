//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: storage selection and the engine/catalog services
//! - `routes/`: HTTP handlers, one file per resource
//! - `dto.rs`: request DTOs and parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router from process configuration (used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let services = AppServices::from_config(config).await?;
    Ok(build_app_with(config.jwt_secret.clone(), Arc::new(services)))
}

/// Build the router over already-constructed services.
pub fn build_app_with(jwt_secret: String, services: Arc<AppServices>) -> Router {
    let jwt = Arc::new(evently_auth::Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let public = routes::public_router().layer(axum::middleware::from_fn_with_state(
        auth_state.clone(),
        middleware::optional_auth_middleware,
    ));

    let protected = routes::protected_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
