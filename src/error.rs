//! Crate-wide error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::models::{error_codes, ApiError};

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by the chat pipeline and its collaborators
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// HTTP status and stable error code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            Self::CircuitOpen(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::UPSTREAM_UNAVAILABLE,
            ),
            Self::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, error_codes::TIMEOUT),
            Self::Upstream(_) | Self::InvalidResponse(_) => {
                (StatusCode::BAD_GATEWAY, error_codes::UPSTREAM_ERROR)
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
            ),
        }
    }

    /// Text sent to clients. Server-side failures get a fixed message so
    /// upstream bodies and storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::CircuitOpen(_) => "Language model is temporarily unavailable".to_string(),
            Self::Timeout(_) => "Upstream service timed out".to_string(),
            Self::Upstream(_) | Self::InvalidResponse(_) => "Upstream service error".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(ApiError::new(code, self.public_message()))).into_response()
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Blocking task failed: {}", err))
    }
}

impl From<config::ConfigError> for ChatError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
