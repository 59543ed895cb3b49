use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use evently_infra::RegistrationError;

pub fn registration_error_response(err: RegistrationError) -> axum::response::Response {
    match err {
        RegistrationError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        RegistrationError::AlreadyRegistered => json_error(
            StatusCode::BAD_REQUEST,
            "already_registered",
            "already registered for this event",
        ),
        RegistrationError::Forbidden => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        e @ RegistrationError::CapacityRaceLost(_) => {
            json_error(StatusCode::CONFLICT, "capacity_race_lost", e.to_string())
        }
        RegistrationError::InvalidState(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_state", msg)
        }
        RegistrationError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        RegistrationError::Storage(e) => {
            tracing::error!(error = %e, "storage failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "internal storage error",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
