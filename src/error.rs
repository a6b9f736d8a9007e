use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// The error kinds from the error-handling design: each maps to one HTTP
/// status and recovery policy. Degraded paths (upstream/LLM failure) are
/// handled by the caller returning a neutral default *before* an
/// `AppError` would even be constructed — by the time one reaches a
/// handler, it is something the caller could not route around.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("request cancelled")]
    Cancelled,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error_code: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl AppError {
    fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::UpstreamTransport(_) => "upstream_transport_error",
            AppError::Parse(_) => "parse_error",
            AppError::Storage(_) => "storage_error",
            AppError::Cancelled => "cancelled",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            AppError::Parse(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, AppError::Cancelled) {
            tracing::debug!("request cancelled by client, abandoning quietly");
        } else if matches!(self, AppError::Storage(_)) {
            tracing::error!(error = %self, "storage error");
        }

        HttpResponse::build(self.status_code()).json(ErrorEnvelope {
            success: false,
            error_code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Storage(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamTransport(err.to_string())
    }
}
