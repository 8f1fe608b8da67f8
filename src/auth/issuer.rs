//! Credential verification and token issuance.
//!
//! Every token pair leaves through [`Issuer::rotate`], which mints the pair
//! for generation `expected + 1` and only hands it out if the store accepted
//! the compare-and-swap from `expected`. A refresh token is valid while the
//! store entry is live and its generation matches the `ver` claim.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{self, SaltString},
};
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::db::{Database, NewUser, User};
use crate::jwt::{AccessClaims, JwtConfig, TokenError, TokenPair, unix_now};

use super::proactive::within_renewal_window;
use super::revocation;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;

/// Login retries when a concurrent rotation wins the race for the entry.
const LOGIN_ROTATION_ATTEMPTS: usize = 3;

/// A user together with a freshly issued token pair.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub user: User,
    pub tokens: TokenPair,
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("refresh token is no longer valid")]
    RefreshTokenInvalid,
    #[error("session was rotated concurrently")]
    RotationConflict,
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Issues and rotates token pairs against one store and signing key.
pub struct Issuer<'a> {
    db: &'a Database,
    jwt: &'a JwtConfig,
}

impl<'a> Issuer<'a> {
    pub fn new(db: &'a Database, jwt: &'a JwtConfig) -> Self {
        Self { db, jwt }
    }

    /// Create an account and log it in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<IssuedSession, IssueError> {
        let email = normalize_email(email)?;
        validate_password(password)?;
        let name = validate_name(name)?;

        if !self.db.users().is_email_available(&email).await? {
            return Err(IssueError::EmailTaken);
        }

        let password_hash = hash_password(password.to_string()).await?;
        let uuid = uuid::Uuid::new_v4().to_string();

        let id = self
            .db
            .users()
            .create(NewUser {
                uuid: &uuid,
                email: &email,
                name,
                password_hash: &password_hash,
            })
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db_err) if db_err.is_unique_violation() => IssueError::EmailTaken,
                _ => IssueError::Database(e),
            })?;

        let user = self
            .db
            .users()
            .get_by_id(id)
            .await?
            .ok_or(IssueError::Database(sqlx::Error::RowNotFound))?;

        info!(user = %user.uuid, "Registered user");
        self.establish(user).await
    }

    /// Verify credentials and issue a new pair. Any previous refresh token
    /// of the user stops working.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedSession, IssueError> {
        let email = normalize_email(email).map_err(|_| IssueError::InvalidCredentials)?;

        let Some(user) = self.db.users().get_by_email(&email).await? else {
            debug!("Login for unknown email");
            return Err(IssueError::InvalidCredentials);
        };

        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            debug!(user = %user.uuid, "Login with wrong password");
            return Err(IssueError::InvalidCredentials);
        }

        self.establish(user).await
    }

    /// Exchange a refresh token (bearer form) for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, IssueError> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;

        let user = self
            .db
            .users()
            .get_by_uuid(&claims.sub)
            .await?
            .ok_or(IssueError::RefreshTokenInvalid)?;

        let entry = self
            .db
            .tokens()
            .get(user.id)
            .await?
            .ok_or(IssueError::RefreshTokenInvalid)?;

        if !entry.is_live(unix_now()?) {
            revocation::clear_expired_entry(self.db, &user, entry.version).await?;
            return Err(IssueError::RefreshTokenInvalid);
        }

        if entry.version != claims.ver {
            warn!(
                user = %user.uuid,
                presented = claims.ver,
                current = entry.version,
                "Superseded refresh token presented"
            );
            return Err(IssueError::RefreshTokenInvalid);
        }

        self.rotate(&user, entry.version)
            .await?
            .ok_or(IssueError::RefreshTokenInvalid)
    }

    /// Rotate on behalf of a request whose access token is about to expire.
    ///
    /// Returns `None` when there is nothing to rotate: the access token is
    /// outside the renewal window, the user is gone, the entry is absent or
    /// expired, the access token belongs to an older generation, or a
    /// concurrent rotation won.
    pub async fn renew_if_current(
        &self,
        claims: &AccessClaims,
    ) -> Result<Option<TokenPair>, IssueError> {
        let now = unix_now()?;
        if !within_renewal_window(claims.exp, now) {
            return Ok(None);
        }
        let Some(user) = self.db.users().get_by_uuid(&claims.sub).await? else {
            return Ok(None);
        };
        let Some(entry) = self.db.tokens().get(user.id).await? else {
            return Ok(None);
        };
        if !entry.is_live(now) || entry.version != claims.ver {
            return Ok(None);
        }
        self.rotate(&user, entry.version).await
    }

    /// Mint a pair for generation `expected_version + 1` and swap it in.
    /// `None` means the stored generation moved on before the swap.
    pub(crate) async fn rotate(
        &self,
        user: &User,
        expected_version: i64,
    ) -> Result<Option<TokenPair>, IssueError> {
        let version = expected_version + 1;
        let refresh = self.jwt.generate_refresh_pair(&user.uuid, version)?;
        let access = self
            .jwt
            .generate_access_token_at(&user.uuid, version, refresh.issued_at)?;

        let swapped = self
            .db
            .tokens()
            .rotate(user.id, expected_version, &refresh.secret, refresh.expires_at)
            .await?;

        if !swapped {
            debug!(user = %user.uuid, expected_version, "Lost rotation race");
            return Ok(None);
        }

        debug!(user = %user.uuid, version, "Rotated refresh token");
        Ok(Some(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
        }))
    }

    /// Issue the first pair of a new session, whatever the current entry is.
    async fn establish(&self, mut user: User) -> Result<IssuedSession, IssueError> {
        for _ in 0..LOGIN_ROTATION_ATTEMPTS {
            if let Some(tokens) = self.rotate(&user, user.refresh_version).await? {
                info!(user = %user.uuid, "Issued session");
                return Ok(IssuedSession { user, tokens });
            }
            user = self
                .db
                .users()
                .get_by_id(user.id)
                .await?
                .ok_or(IssueError::Database(sqlx::Error::RowNotFound))?;
        }
        Err(IssueError::RotationConflict)
    }
}

/// Trim and lowercase an email address, rejecting obviously malformed ones.
fn normalize_email(email: &str) -> Result<String, IssueError> {
    let email = email.trim().to_lowercase();
    if email.len() > MAX_EMAIL_LEN {
        return Err(IssueError::InvalidInput("Email is too long"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(IssueError::InvalidInput("Invalid email address")),
    }
}

fn validate_password(password: &str) -> Result<(), IssueError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(IssueError::InvalidInput(
            "Password must be at least 6 characters",
        ));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(IssueError::InvalidInput(
            "Password must be at most 128 characters",
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<&str, IssueError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IssueError::InvalidInput("Name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(IssueError::InvalidInput(
            "Name must be at most 64 characters",
        ));
    }
    Ok(name)
}

async fn hash_password(password: String) -> Result<String, IssueError> {
    tokio::task::spawn_blocking(move || -> Result<String, password_hash::Error> {
        let mut salt_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| IssueError::PasswordHash(e.to_string()))?
    .map_err(|e| IssueError::PasswordHash(e.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, IssueError> {
    tokio::task::spawn_blocking(move || -> Result<bool, password_hash::Error> {
        let parsed = PasswordHash::new(&hash)?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(|e| IssueError::PasswordHash(e.to_string()))?
    .map_err(|e| IssueError::PasswordHash(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-for-testing-only-32b";

    async fn setup() -> (Database, JwtConfig) {
        let db = Database::open(":memory:").await.unwrap();
        (db, JwtConfig::new(SECRET))
    }

    #[tokio::test]
    async fn test_register_issues_session() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);

        let session = issuer
            .register("  Alice@Example.com ", "hunter22", " Alice ")
            .await
            .unwrap();

        assert_eq!(session.user.email, "alice@example.com");
        assert_eq!(session.user.name, "Alice");

        let access = jwt
            .validate_access_token(&session.tokens.access_token)
            .unwrap();
        let refresh = jwt
            .validate_refresh_token(&session.tokens.refresh_token)
            .unwrap();
        assert_eq!(access.sub, session.user.uuid);
        assert_eq!(refresh.sub, session.user.uuid);
        assert_eq!(access.ver, 1);
        assert_eq!(refresh.ver, 1);

        let entry = db.tokens().get(session.user.id).await.unwrap().unwrap();
        assert_eq!(entry.version, 1);
        assert_ne!(entry.secret, session.tokens.refresh_token);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);

        for (email, password, name) in [
            ("no-at-sign", "hunter22", "A"),
            ("@example.com", "hunter22", "A"),
            ("a@x.com", "short", "A"),
            ("a@x.com", "hunter22", "   "),
        ] {
            let result = issuer.register(email, password, name).await;
            assert!(
                matches!(result, Err(IssueError::InvalidInput(_))),
                "{email} / {password} / {name:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);

        issuer.register("a@x.com", "hunter22", "A").await.unwrap();
        let result = issuer.register("A@X.com", "hunter22", "B").await;
        assert!(matches!(result, Err(IssueError::EmailTaken)));
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password_and_unknown_email() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);
        issuer.register("a@x.com", "hunter22", "A").await.unwrap();

        let wrong = issuer.login("a@x.com", "hunter23").await;
        let unknown = issuer.login("b@x.com", "hunter22").await;
        assert!(matches!(wrong, Err(IssueError::InvalidCredentials)));
        assert!(matches!(unknown, Err(IssueError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_login_replaces_previous_refresh_token() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);
        let first = issuer.register("a@x.com", "hunter22", "A").await.unwrap();

        let second = issuer.login("a@x.com", "hunter22").await.unwrap();

        let stale = issuer.refresh(&first.tokens.refresh_token).await;
        assert!(matches!(stale, Err(IssueError::RefreshTokenInvalid)));
        issuer.refresh(&second.tokens.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_invalidates_predecessor() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);
        let session = issuer.register("a@x.com", "hunter22", "A").await.unwrap();

        let rotated = issuer.refresh(&session.tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, session.tokens.refresh_token);
        assert_eq!(jwt.validate_access_token(&rotated.access_token).unwrap().ver, 2);

        let replay = issuer.refresh(&session.tokens.refresh_token).await;
        assert!(matches!(replay, Err(IssueError::RefreshTokenInvalid)));
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);
        let session = issuer.register("a@x.com", "hunter22", "A").await.unwrap();

        let result = issuer.refresh(&session.tokens.access_token).await;
        assert!(matches!(result, Err(IssueError::Token(TokenError::WrongKind))));
    }

    #[tokio::test]
    async fn test_refresh_with_expired_entry_clears_it() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);
        let session = issuer.register("a@x.com", "hunter22", "A").await.unwrap();

        sqlx::query("UPDATE users SET refresh_expires_at = 1 WHERE id = ?")
            .bind(session.user.id)
            .execute(db.pool())
            .await
            .unwrap();

        let result = issuer.refresh(&session.tokens.refresh_token).await;
        assert!(matches!(result, Err(IssueError::RefreshTokenInvalid)));
        assert!(db.tokens().get(session.user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renew_if_current_ignores_older_generation() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);
        let session = issuer.register("a@x.com", "hunter22", "A").await.unwrap();
        let mut old_claims = jwt
            .validate_access_token(&session.tokens.access_token)
            .unwrap();
        old_claims.exp = unix_now().unwrap() + 60;

        let renewed = issuer.renew_if_current(&old_claims).await.unwrap();
        assert!(renewed.is_some());

        // Same access token again: its generation is gone
        let again = issuer.renew_if_current(&old_claims).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_renew_if_current_ignores_long_expired_token() {
        let (db, jwt) = setup().await;
        let issuer = Issuer::new(&db, &jwt);
        let session = issuer.register("a@x.com", "hunter22", "A").await.unwrap();
        let mut claims = jwt
            .validate_access_token(&session.tokens.access_token)
            .unwrap();
        claims.exp = unix_now().unwrap() - 6 * 24 * 3600;

        assert!(issuer.renew_if_current(&claims).await.unwrap().is_none());
        let entry = db.tokens().get(session.user.id).await.unwrap().unwrap();
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_single_winner() {
        let (db, jwt) = setup().await;
        let session = Issuer::new(&db, &jwt)
            .register("a@x.com", "hunter22", "A")
            .await
            .unwrap();

        let token = session.tokens.refresh_token;
        let issuer = Issuer::new(&db, &jwt);
        let (a, b) = tokio::join!(issuer.refresh(&token), issuer.refresh(&token));

        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "exactly one refresh should win"
        );
    }
}
