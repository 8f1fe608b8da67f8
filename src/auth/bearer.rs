//! Bearer credential parsing for the `Authorization` header.

use axum::http::{HeaderMap, header};

/// Extract the token from an `Authorization: Bearer <token>` header.
/// The scheme is matched case-insensitively.
pub fn get_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}
