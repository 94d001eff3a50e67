use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid scope: {0}")]
    InvalidScope(u32),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field not allowed for this scope: {0}")]
    UnexpectedField(&'static str),

    #[error("token is already active")]
    AlreadyActive,

    #[error("token has been revoked")]
    AlreadyRevoked,

    #[error("confirmation phrase does not match")]
    ConfirmationMismatch,

    #[error("confirmation phrase has expired")]
    ConfirmationExpired,

    #[error("probe is not active")]
    ProbeNotActive,

    #[error("imsi or iccid is required")]
    MissingIdentifier,

    #[error("token is not active")]
    TokenNotActive,

    #[error("mac is already registered: {0}")]
    DuplicateMac(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("storage unavailable")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "not_found",
                self.to_string(),
            ),
            AppError::Conflict(_) => (
                StatusCode::CONFLICT,
                "conflict_error",
                "conflict",
                self.to_string(),
            ),
            AppError::InvalidScope(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_scope",
                self.to_string(),
            ),
            AppError::MissingField(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_field",
                self.to_string(),
            ),
            AppError::UnexpectedField(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "unexpected_field",
                self.to_string(),
            ),
            AppError::AlreadyActive => (
                StatusCode::CONFLICT,
                "conflict_error",
                "already_active",
                self.to_string(),
            ),
            AppError::AlreadyRevoked => (
                StatusCode::CONFLICT,
                "conflict_error",
                "already_revoked",
                self.to_string(),
            ),
            AppError::ConfirmationMismatch => (
                StatusCode::BAD_REQUEST,
                "confirmation_error",
                "confirmation_mismatch",
                self.to_string(),
            ),
            AppError::ConfirmationExpired => (
                StatusCode::BAD_REQUEST,
                "confirmation_error",
                "confirmation_expired",
                self.to_string(),
            ),
            AppError::ProbeNotActive => (
                StatusCode::CONFLICT,
                "conflict_error",
                "probe_not_active",
                self.to_string(),
            ),
            AppError::MissingIdentifier => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_identifier",
                self.to_string(),
            ),
            AppError::TokenNotActive => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "token_not_active",
                self.to_string(),
            ),
            AppError::DuplicateMac(_) => (
                StatusCode::CONFLICT,
                "conflict_error",
                "duplicate_mac",
                self.to_string(),
            ),
            AppError::InvalidValue(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_value",
                self.to_string(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                self.to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                self.to_string(),
            ),
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "internal_error",
                "unavailable",
                self.to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
