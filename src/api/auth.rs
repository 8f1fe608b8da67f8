//! Authentication API endpoints.
//!
//! - POST `/register` - Create an account and start a session
//! - POST `/login` - Start a session with email and password
//! - GET `/verify` - Check the access token and return the user
//! - POST `/logout` - Clear the refresh token of the caller
//! - POST `/refresh` - Exchange a refresh token for a new pair

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::auth::{
    Auth, AuthErrorKind, BearerToken, ClientIpSource, HasAuthBackend, IssuedSession, UserInfo,
    proactive_refresh, revocation,
};
use crate::db::Database;
use crate::impl_has_auth_backend;
use crate::jwt::{JwtConfig, TokenPair};
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub no_signup: bool,
    pub rate_limit: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(AuthState);

impl AuthState {
    pub fn new(db: Database, jwt: Arc<JwtConfig>, no_signup: bool, ip_source: ClientIpSource) -> Self {
        Self {
            db,
            jwt,
            no_signup,
            rate_limit: Arc::new(RateLimitConfig::new(ip_source)),
        }
    }

    /// Layer proactive token renewal over authenticated routes.
    pub fn protect(&self, routes: Router<AuthState>) -> Router {
        routes
            .route_layer(middleware::from_fn_with_state(
                self.clone(),
                proactive_refresh::<AuthState>,
            ))
            .with_state(self.clone())
    }
}

pub fn router(state: AuthState) -> Router {
    let register_routes = Router::new()
        .route("/register", post(register))
        .layer(middleware::from_fn_with_state(
            state.rate_limit.clone(),
            rate_limit_register,
        ))
        .with_state(state.clone());

    let login_routes = Router::new()
        .route("/login", post(login))
        .layer(middleware::from_fn_with_state(
            state.rate_limit.clone(),
            rate_limit_login,
        ))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .with_state(state.clone());

    let protected_routes = state.protect(Router::new().route("/verify", get(verify)));

    Router::new()
        .merge(register_routes)
        .merge(login_routes)
        .merge(session_routes)
        .merge(protected_routes)
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    name: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    user: UserInfo,
    #[serde(flatten)]
    tokens: TokenPair,
}

impl From<IssuedSession> for SessionResponse {
    fn from(session: IssuedSession) -> Self {
        Self {
            user: UserInfo::from(&session.user),
            tokens: session.tokens,
        }
    }
}

#[derive(Serialize)]
struct VerifyResponse {
    user: UserInfo,
}

#[derive(Serialize)]
struct LogoutResponse {
    success: bool,
}

async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.no_signup {
        return Err(ApiError::forbidden("Signups are disabled"));
    }

    let session = state
        .issuer()
        .register(&payload.email, &payload.password, &payload.name)
        .await?;

    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .issuer()
        .login(&payload.email, &payload.password)
        .await?;
    Ok(Json(SessionResponse::from(session)))
}

/// Lightweight endpoint for checking auth status.
async fn verify(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<Json<VerifyResponse>, ApiError> {
    let user = state
        .db
        .users()
        .get_by_uuid(auth.user_uuid())
        .await
        .db_err("Failed to get user")?
        .ok_or(ApiError::Auth(AuthErrorKind::UserNotFound))?;

    Ok(Json(VerifyResponse {
        user: UserInfo::from(&user),
    }))
}

async fn logout(
    State(state): State<AuthState>,
    BearerToken(token): BearerToken,
) -> Result<Json<LogoutResponse>, ApiError> {
    revocation::logout(&state.db, &state.jwt, &token).await?;
    Ok(Json(LogoutResponse { success: true }))
}

async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let tokens = state.issuer().refresh(&payload.refresh_token).await?;
    Ok(Json(tokens))
}
