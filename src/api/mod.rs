mod auth;
mod error;

use axum::Router;
use std::sync::Arc;

use crate::auth::ClientIpSource;
use crate::db::Database;
use crate::jwt::JwtConfig;

pub use auth::AuthState;
pub use error::{ApiError, ResultExt};

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    no_signup: bool,
    ip_source: ClientIpSource,
) -> Router {
    let auth_state = AuthState::new(db, jwt, no_signup, ip_source);

    Router::new().nest("/auth", auth::router(auth_state))
}
