//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::jwt::TokenError;

/// Why a request could not be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    InvalidToken,
    WrongTokenKind,
    TokenExpired,
    RefreshTokenInvalid,
    UserNotFound,
    Internal,
}

impl AuthErrorKind {
    /// Machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::InvalidToken => "invalid_token",
            Self::WrongTokenKind => "wrong_token_kind",
            Self::TokenExpired => "token_expired",
            Self::RefreshTokenInvalid => "refresh_token_invalid",
            Self::UserNotFound => "user_not_found",
            Self::Internal => "internal",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "Not authenticated",
            Self::InvalidToken => "Invalid token",
            Self::WrongTokenKind => "Wrong token type",
            Self::TokenExpired => "Token expired",
            Self::RefreshTokenInvalid => "Refresh token is no longer valid",
            Self::UserNotFound => "User not found",
            Self::Internal => "Internal error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<&TokenError> for AuthErrorKind {
    fn from(e: &TokenError) -> Self {
        match e {
            TokenError::InvalidSignature => Self::InvalidToken,
            TokenError::WrongKind => Self::WrongTokenKind,
            TokenError::Expired => Self::TokenExpired,
            TokenError::Encoding(_) | TokenError::TimeError => Self::Internal,
        }
    }
}

/// API authentication error, rendered as `{error, code}` JSON.
#[derive(Debug)]
pub struct ApiAuthError(pub AuthErrorKind);

impl From<TokenError> for ApiAuthError {
    fn from(e: TokenError) -> Self {
        Self(AuthErrorKind::from(&e))
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            code: &'static str,
        }

        (
            self.0.status_code(),
            Json(ErrorResponse {
                error: self.0.message(),
                code: self.0.code(),
            }),
        )
            .into_response()
    }
}
