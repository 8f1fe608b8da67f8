//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::auth::{ApiAuthError, AuthErrorKind, IssueError};

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
    /// Token problems, rendered with a machine-readable `code`.
    Auth(AuthErrorKind),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal("Database error".into())
    }
}

impl From<IssueError> for ApiError {
    fn from(e: IssueError) -> Self {
        match e {
            IssueError::InvalidInput(msg) => Self::bad_request(msg),
            IssueError::EmailTaken => Self::conflict("Email is already registered"),
            IssueError::InvalidCredentials => Self::unauthorized("Invalid email or password"),
            IssueError::RefreshTokenInvalid => Self::Auth(AuthErrorKind::RefreshTokenInvalid),
            IssueError::RotationConflict => {
                Self::conflict("Session changed concurrently, please retry")
            }
            IssueError::Token(e) => match AuthErrorKind::from(&e) {
                AuthErrorKind::Internal => {
                    error!("Token error: {}", e);
                    Self::internal("Token error")
                }
                kind => Self::Auth(kind),
            },
            IssueError::PasswordHash(e) => {
                error!("Password hashing failed: {}", e);
                Self::internal("Internal error")
            }
            IssueError::Database(e) => Self::db_error("Database error", e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Auth(kind) => return ApiAuthError(kind).into_response(),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
