//! Error types for the xAPI auth proxy

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Proxy errors, one variant per failure class surfaced to clients.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (boot-time fatal, 500 if hit at runtime)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request body could not be parsed or required fields are missing
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// Requested scope is not in the issuance-valid set
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    /// Authentication failure. Deliberately carries no detail: the response
    /// body must not reveal which sub-check failed.
    #[error("Invalid token")]
    Unauthenticated,

    /// Permission evaluator denial; the reason names the mismatched field
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No tenant matches the request Host
    #[error("Unknown tenant: {0}")]
    TenantNotFound(String),

    /// Operation not available in this deployment mode
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// LRS network error, timeout, or non-HTTP response
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tenant store error
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Malformed(_) | Self::UnknownScope(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TenantNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message. Internal failure detail is logged, not leaked.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Config(_) | Self::Io(_) | Self::Store(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::Upstream(_) => "Upstream request failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}
