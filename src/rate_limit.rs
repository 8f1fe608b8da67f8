//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to prevent brute force attacks.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::{ClientIpSource, extract_client_ip};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();
const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Rate limiting configuration for authentication endpoints.
pub struct RateLimitConfig {
    /// Per-IP limiter for login (1 request per second, bursts of 5)
    pub login: IpLimiter,
    /// Per-IP limiter for registration (5 requests per minute)
    pub register: IpLimiter,
    /// Where the client address comes from
    pub ip_source: ClientIpSource,
}

impl RateLimitConfig {
    pub fn new(ip_source: ClientIpSource) -> Self {
        Self {
            login: RateLimiter::keyed(Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST)),
            register: RateLimiter::keyed(Quota::per_minute(REGISTER_PER_MIN)),
            ip_source,
        }
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.login,
        &config.ip_source,
        request,
        next,
        "Too many login attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.register,
        &config.ip_source,
        request,
        next,
        "Too many signup attempts. Please wait before trying again.",
    )
    .await
}

async fn check(
    limiter: &IpLimiter,
    ip_source: &ClientIpSource,
    request: Request,
    next: Next,
    message: &'static str,
) -> Response {
    let ip = match extract_client_ip(&request, ip_source) {
        Ok(ip) => ip,
        Err(_) => {
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, "Rate limit exceeded");
            (StatusCode::TOO_MANY_REQUESTS, message).into_response()
        }
    }
}
