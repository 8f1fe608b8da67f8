//! Revocation of refresh entries: logout and expiry sweeps.
//!
//! Access tokens are stateless, so revocation only clears the store entry.
//! Outstanding access tokens stay valid until their own expiry.

use tracing::{debug, info};

use crate::db::{Database, User};
use crate::jwt::{JwtConfig, unix_now};

use super::issuer::IssueError;

/// Log out the holder of `access_token`.
///
/// The token only needs a valid signature; an expired access token can
/// still end its session. Logging out twice is not an error.
pub async fn logout(
    db: &Database,
    jwt: &JwtConfig,
    access_token: &str,
) -> Result<(), IssueError> {
    let claims = jwt.inspect_access_token(access_token)?;

    let Some(user) = db.users().get_by_uuid(&claims.sub).await? else {
        debug!(user = %claims.sub, "Logout for unknown user");
        return Ok(());
    };

    if db.tokens().clear(user.id).await? {
        info!(user = %user.uuid, "Logged out");
    } else {
        debug!(user = %user.uuid, "Logout without a live refresh token");
    }
    Ok(())
}

/// Clear an entry found expired at generation `version`. A session
/// established since then is left alone.
pub(crate) async fn clear_expired_entry(
    db: &Database,
    user: &User,
    version: i64,
) -> Result<(), sqlx::Error> {
    if db.tokens().clear_if_version(user.id, version).await? {
        debug!(user = %user.uuid, version, "Cleared expired refresh token");
    } else {
        debug!(user = %user.uuid, version, "Expired refresh token already replaced");
    }
    Ok(())
}

/// Clear every expired refresh entry. Returns how many were cleared.
pub async fn sweep_expired(db: &Database) -> Result<u64, IssueError> {
    let now = unix_now()?;
    Ok(db.tokens().clear_expired(now).await?)
}
