use arbor_core::ArborError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(
            "not_found",
            format!("{} not found", what),
            "Check the identifier and try again",
        )
    }

    pub fn invalid(msg: &str) -> Self {
        Self::new("invalid_request", msg, "Fix the request parameters")
    }

    pub fn denied(msg: &str) -> Self {
        Self::new("access_denied", msg, "Provide a passphrase with remaining quota")
    }

    pub fn internal(msg: &str) -> Self {
        Self::new("internal_error", msg, "Check service logs for details")
    }
}

pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorEnvelope,
}

impl AppError {
    pub fn not_found(what: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorEnvelope::not_found(what),
        }
    }

    pub fn bad_request(msg: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorEnvelope::invalid(&msg.to_string()),
        }
    }

    pub fn forbidden(msg: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: ErrorEnvelope::denied(&msg.to_string()),
        }
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorEnvelope::internal(&msg.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.body)).into_response()
    }
}

impl From<ArborError> for AppError {
    fn from(err: ArborError) -> Self {
        match &err {
            ArborError::NotFound(what) => AppError::not_found(what),
            ArborError::AccessDenied(msg) => AppError::forbidden(msg),
            ArborError::InvalidPath(_) | ArborError::Acquisition { .. } => {
                AppError::bad_request(err)
            }
            _ => AppError::internal(err),
        }
    }
}
