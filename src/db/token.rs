//! Store form of refresh tokens.
//!
//! Each user row carries at most one live refresh entry: an opaque secret,
//! its expiry and a rotation version. Access tokens are stateless and never
//! stored. Every write to the entry bumps the version. Rotation and
//! clearing of expired entries are compare-and-swaps on it; logout is not.

use sqlx::sqlite::SqlitePool;

/// The live refresh entry for a user.
#[derive(Debug, Clone)]
pub struct StoredRefresh {
    pub user_id: i64,
    pub secret: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    pub version: i64,
}

impl StoredRefresh {
    /// Whether the entry is still usable at `now` (Unix seconds).
    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// Store for managing the per-user refresh entry.
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the refresh entry for a user, if one is set.
    /// Expired entries are returned as-is; callers check [`StoredRefresh::is_live`].
    pub async fn get(&self, user_id: i64) -> Result<Option<StoredRefresh>, sqlx::Error> {
        let row: Option<(i64, Option<String>, Option<i64>, i64)> = sqlx::query_as(
            "SELECT id, refresh_token, refresh_expires_at, refresh_version FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(user_id, secret, expires_at, version)| {
            Some(StoredRefresh {
                user_id,
                secret: secret?,
                expires_at: u64::try_from(expires_at?).unwrap_or(0),
                version,
            })
        }))
    }

    /// Replace the refresh entry, moving the version from `expected_version`
    /// to `expected_version + 1`.
    ///
    /// Returns `false` if the stored version no longer matches, which means
    /// another rotation or a revocation got there first.
    pub async fn rotate(
        &self,
        user_id: i64,
        expected_version: i64,
        secret: &str,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let expires_at = i64::try_from(expires_at).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "UPDATE users SET refresh_token = ?, refresh_expires_at = ?, refresh_version = refresh_version + 1 WHERE id = ? AND refresh_version = ?",
        )
        .bind(secret)
        .bind(expires_at)
        .bind(user_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the refresh entry for a user (logout). Idempotent.
    pub async fn clear(&self, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_expires_at = NULL, refresh_version = refresh_version + 1 WHERE id = ? AND refresh_token IS NOT NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the entry only if it is still at `expected_version`.
    pub async fn clear_if_version(
        &self,
        user_id: i64,
        expected_version: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_expires_at = NULL, refresh_version = refresh_version + 1 WHERE id = ? AND refresh_version = ? AND refresh_token IS NOT NULL",
        )
        .bind(user_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear every entry that expired before `now` (Unix seconds).
    pub async fn clear_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_expires_at = NULL, refresh_version = refresh_version + 1 WHERE refresh_token IS NOT NULL AND refresh_expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
