//! Application-wide error types.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Classified failure of a chain call.
///
/// `code` is one of `decode`, `reverted`, `transport`, `invalid_input`, `other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainError {
    pub code: &'static str,
    pub message: String,
}

impl ChainError {
    pub const DECODE: &'static str = "decode";
    pub const REVERTED: &'static str = "reverted";
    pub const TRANSPORT: &'static str = "transport";
    pub const INVALID_INPUT: &'static str = "invalid_input";
    pub const OTHER: &'static str = "other";

    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A decode failure or revert on a view call means the proposal has no
    /// voting record yet.
    pub fn is_soft_not_found(&self) -> bool {
        self.code == Self::DECODE || self.code == Self::REVERTED
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Chain error: {0}")]
    Chain(ChainError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ChainError> for GrantError {
    fn from(e: ChainError) -> Self {
        Self::Chain(e)
    }
}

impl From<JsonRejection> for GrantError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for GrantError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, GrantError>;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GrantError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Chain(_) | Self::Storage(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Signing(_)
            | Self::Database(_)
            | Self::Migrate(_)
            | Self::Json(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GrantError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Validation(m)
            | Self::Unauthenticated(m)
            | Self::Authorization(m)
            | Self::NotFound(m)
            | Self::Conflict(m) => ErrorResponse {
                message: m.clone(),
                error: None,
            },
            Self::Chain(e) => ErrorResponse {
                message: "Chain call failed".to_string(),
                error: Some(e.message.clone()),
            },
            other => {
                tracing::error!("request failed: {other}");
                ErrorResponse {
                    message: "Internal error".to_string(),
                    error: Some(other.to_string()),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
