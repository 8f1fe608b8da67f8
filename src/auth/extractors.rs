//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::bearer::get_bearer_token;
use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;

/// Requires a valid, unexpired access token in the `Authorization` header.
///
/// Validation is stateless. Renewal of tokens close to expiry happens in the
/// proactive refresh middleware, not here.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = get_bearer_token(&parts.headers)
            .ok_or(ApiAuthError(AuthErrorKind::NotAuthenticated))?;
        let claims = state.jwt().validate_access_token(token)?;
        Ok(Auth(AuthenticatedUser { claims }))
    }
}

/// The raw bearer credential, unverified.
pub struct BearerToken(pub String);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        get_bearer_token(&parts.headers)
            .map(|token| BearerToken(token.to_string()))
            .ok_or(ApiAuthError(AuthErrorKind::NotAuthenticated))
    }
}
