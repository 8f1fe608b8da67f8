//! Proactive token renewal.
//!
//! Requests whose access token expires within [`RENEWAL_WINDOW_SECS`] get a
//! rotated pair attached to the response, so active clients never see an
//! expired access token. The request itself is always passed through; the
//! downstream handler still authenticates it with the presented token.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::jwt::{TokenPair, unix_now};

use super::bearer::get_bearer_token;
use super::state::HasAuthBackend;

/// Remaining access-token lifetime, in seconds, at or below which a request
/// triggers rotation.
pub const RENEWAL_WINDOW_SECS: u64 = 5 * 60;

pub const NEW_ACCESS_TOKEN_HEADER: &str = "new-access-token";
pub const NEW_REFRESH_TOKEN_HEADER: &str = "new-refresh-token";
pub const TOKENS_ROTATED_HEADER: &str = "tokens-rotated";

/// Field added to JSON object bodies that carry a rotated pair.
pub const NEW_TOKENS_FIELD: &str = "newTokens";

/// Largest response body, in bytes, that gets the pair mirrored into it.
const MAX_MIRRORED_BODY: u64 = 1024 * 1024;

/// Whether a token expiring at `exp` is due for renewal at `now`.
///
/// Tokens that expired at most [`RENEWAL_WINDOW_SECS`] ago still count, so a
/// request racing its own expiry is renewed. Anything older is not.
pub fn within_renewal_window(exp: u64, now: u64) -> bool {
    exp <= now.saturating_add(RENEWAL_WINDOW_SECS)
        && now <= exp.saturating_add(RENEWAL_WINDOW_SECS)
}

/// Middleware that rotates tokens close to expiry.
pub async fn proactive_refresh<S>(State(state): State<S>, request: Request, next: Next) -> Response
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    let presented = get_bearer_token(request.headers()).map(str::to_owned);
    let rotated = match presented {
        Some(token) => evaluate(&state, &token).await,
        None => None,
    };

    let response = next.run(request).await;

    match rotated {
        Some(pair) => attach_tokens(response, &pair).await,
        None => response,
    }
}

async fn evaluate<S>(state: &S, token: &str) -> Option<TokenPair>
where
    S: HasAuthBackend + Send + Sync,
{
    let claims = match state.jwt().inspect_access_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Not renewing unverifiable token");
            return None;
        }
    };

    let now = unix_now().ok()?;
    if !within_renewal_window(claims.exp, now) {
        return None;
    }

    match state.issuer().renew_if_current(&claims).await {
        Ok(Some(pair)) => {
            info!(user = %claims.sub, remaining = claims.exp.saturating_sub(now), "Proactively rotated tokens");
            Some(pair)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(user = %claims.sub, error = %e, "Proactive rotation failed");
            None
        }
    }
}

/// Attach a rotated pair to a response: always as headers, and mirrored
/// into the body when it is a JSON object.
async fn attach_tokens(response: Response, pair: &TokenPair) -> Response {
    let (mut parts, body) = response.into_parts();

    let (Ok(access), Ok(refresh)) = (
        HeaderValue::from_str(&pair.access_token),
        HeaderValue::from_str(&pair.refresh_token),
    ) else {
        warn!("Rotated tokens are not valid header values");
        return Response::from_parts(parts, body);
    };
    parts.headers.insert(NEW_ACCESS_TOKEN_HEADER, access);
    parts.headers.insert(NEW_REFRESH_TOKEN_HEADER, refresh);
    parts
        .headers
        .insert(TOKENS_ROTATED_HEADER, HeaderValue::from_static("true"));

    if !is_json(&parts.headers) {
        return Response::from_parts(parts, body);
    }

    // Bodies of unknown or large size are streamed through untouched
    match body.size_hint().upper() {
        Some(len) if len <= MAX_MIRRORED_BODY => {}
        _ => {
            debug!("Not mirroring rotated tokens into an unbounded body");
            return Response::from_parts(parts, body);
        }
    }

    let bytes = match axum::body::to_bytes(body, MAX_MIRRORED_BODY as usize).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to buffer response body");
            parts.status = StatusCode::INTERNAL_SERVER_ERROR;
            parts.headers.remove(header::CONTENT_TYPE);
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let bytes = mirror_into_json(bytes, pair);
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// Add the pair under [`NEW_TOKENS_FIELD`] if `bytes` is a JSON object.
/// Anything else is returned unchanged.
fn mirror_into_json(bytes: Bytes, pair: &TokenPair) -> Bytes {
    let Ok(Value::Object(mut map)) = serde_json::from_slice::<Value>(&bytes) else {
        return bytes;
    };
    map.insert(
        NEW_TOKENS_FIELD.to_string(),
        json!({
            "accessToken": pair.access_token,
            "refreshToken": pair.refresh_token,
        }),
    );
    match serde_json::to_vec(&Value::Object(map)) {
        Ok(encoded) => Bytes::from(encoded),
        Err(_) => bytes,
    }
}
