//! Application error type and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::metrics::ERRORS_TOTAL;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("State conflict: {0}")]
    StateConflict(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Invalid signature: {0}")]
    InvalidSignature(anyhow::Error),

    #[error("External service error: {0}")]
    ExternalService(anyhow::Error),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<lettre::error::Error> for AppError {
    fn from(err: lettre::error::Error) -> Self {
        AppError::EmailError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let error_type = match &self {
            AppError::ValidationError(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::StateConflict(_) => "state_conflict",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidSignature(_) => "invalid_signature",
            AppError::ExternalService(_) => "external_service",
            AppError::EmailError(_) => "email",
            AppError::DatabaseError(_) => "database",
            AppError::ConfigError(_) => "config",
            AppError::InternalError(_) => "internal",
        };
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::StateConflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::Forbidden(err) => (StatusCode::FORBIDDEN, err.to_string(), None),
            // Webhook signature mismatches answer 400 so the gateway applies
            // its own redelivery policy instead of treating us as down.
            AppError::InvalidSignature(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::ExternalService(err) => (
                StatusCode::BAD_GATEWAY,
                "External service error".to_string(),
                Some(err.to_string()),
            ),
            AppError::EmailError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Email error".to_string(),
                Some(msg),
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
