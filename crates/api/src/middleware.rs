use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use evently_auth::JwtValidator;

use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

impl AuthState {
    fn principal(&self, headers: &HeaderMap) -> Result<PrincipalContext, StatusCode> {
        let token = extract_token(headers)?;

        let claims = self.jwt.validate(token, Utc::now()).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            StatusCode::UNAUTHORIZED
        })?;

        Ok(PrincipalContext::new(claims.sub, claims.role))
    }
}

/// Require a valid bearer token; inserts [`PrincipalContext`].
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let principal = state.principal(req.headers())?;
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Attach a [`PrincipalContext`] when a valid bearer token is present.
/// Missing or invalid tokens leave the request anonymous.
pub async fn optional_auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Ok(principal) = state.principal(req.headers()) {
        req.extensions_mut().insert(principal);
    }

    next.run(req).await
}

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// `Authorization: Bearer <jwt>`, falling back to the `x-auth-token` header
/// older clients send.
fn extract_token(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let token = match headers.get(axum::http::header::AUTHORIZATION) {
        Some(header) => header
            .to_str()
            .map_err(|_| StatusCode::UNAUTHORIZED)?
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?,
        None => headers
            .get(AUTH_TOKEN_HEADER)
            .ok_or(StatusCode::UNAUTHORIZED)?
            .to_str()
            .map_err(|_| StatusCode::UNAUTHORIZED)?,
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(extract_token(&headers("Bearer abc.def")), Ok("abc.def"));
    }

    #[test]
    fn legacy_auth_token_header_is_accepted() {
        let mut h = HeaderMap::new();
        h.insert(AUTH_TOKEN_HEADER, HeaderValue::from_static(" abc.def "));
        assert_eq!(extract_token(&h), Ok("abc.def"));

        h.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(extract_token(&h), Ok("xyz"));
    }

    #[test]
    fn other_schemes_and_blank_tokens_are_rejected() {
        assert_eq!(extract_token(&headers("Basic xyz")), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(extract_token(&headers("Bearer   ")), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(extract_token(&HeaderMap::new()), Err(StatusCode::UNAUTHORIZED));
    }
}
