//! JWT token generation and validation.
//!
//! Access tokens are verified in one of two ways. `validate_access_token`
//! checks signature, kind and expiry and is what every handler uses.
//! `inspect_access_token` skips the expiry check and is only reachable from
//! inside the crate, for proactive renewal and logout.

use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived access token (15 minutes), never persisted
    Access,
    /// Long-lived refresh token (7 days), paired with a store entry
    Refresh,
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user UUID)
    pub sub: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Rotation generation this token was minted in
    #[serde(default)]
    pub ver: i64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT claims for the bearer form of a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID, unique per issued refresh token
    #[serde(default)]
    pub jti: String,
    /// Subject (user UUID)
    pub sub: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Rotation generation; must equal the store entry's version
    #[serde(default)]
    pub ver: i64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Size of the opaque store secret before encoding.
const STORE_SECRET_BYTES: usize = 32;

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

/// Both representations of a freshly minted refresh token.
#[derive(Debug, Clone)]
pub struct RefreshPair {
    /// Signed bearer form, handed to the client
    pub token: String,
    /// JWT ID of the bearer form
    pub jti: String,
    /// Opaque store form, never leaves the server
    pub secret: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp shared by both forms (Unix seconds)
    pub expires_at: u64,
}

/// An access token and the bearer form of its refresh token, as shipped to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::TimeError)
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Generate an access token for a user in the given rotation generation.
    pub fn generate_access_token(
        &self,
        user_uuid: &str,
        version: i64,
    ) -> Result<AccessTokenResult, TokenError> {
        self.generate_access_token_at(user_uuid, version, unix_now()?)
    }

    /// Generate an access token with an explicit issue time.
    pub fn generate_access_token_at(
        &self,
        user_uuid: &str,
        version: i64,
        issued_at: u64,
    ) -> Result<AccessTokenResult, TokenError> {
        let exp = issued_at + ACCESS_TOKEN_DURATION_SECS;

        let claims = AccessClaims {
            sub: user_uuid.to_string(),
            token_type: TokenType::Access,
            ver: version,
            iat: issued_at,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            issued_at,
            expires_at: exp,
        })
    }

    /// Mint a refresh token in both forms for the given rotation generation.
    pub fn generate_refresh_pair(
        &self,
        user_uuid: &str,
        version: i64,
    ) -> Result<RefreshPair, TokenError> {
        self.generate_refresh_pair_at(user_uuid, version, unix_now()?)
    }

    /// Mint a refresh token pair with an explicit issue time.
    pub fn generate_refresh_pair_at(
        &self,
        user_uuid: &str,
        version: i64,
        issued_at: u64,
    ) -> Result<RefreshPair, TokenError> {
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = issued_at + REFRESH_TOKEN_DURATION_SECS;

        let claims = RefreshClaims {
            jti: jti.clone(),
            sub: user_uuid.to_string(),
            token_type: TokenType::Refresh,
            ver: version,
            iat: issued_at,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(RefreshPair {
            token,
            jti,
            secret: generate_store_secret(),
            issued_at,
            expires_at: exp,
        })
    }

    /// Validate and decode an access token: signature, kind and expiry.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode(token, true)?;
        if claims.token_type != TokenType::Access {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }

    /// Validate and decode a refresh token: signature, kind and expiry.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode(token, true)?;
        if claims.token_type != TokenType::Refresh {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }

    /// Decode an access token checking signature and kind only.
    /// The result may describe an expired token.
    pub(crate) fn inspect_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode(token, false)?;
        if claims.token_type != TokenType::Access {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;

        jsonwebtoken::decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidSignature,
            })
    }
}

/// Generate the opaque store form of a refresh token.
fn generate_store_secret() -> String {
    let mut bytes = [0u8; STORE_SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Malformed, forged or signed with another key
    #[error("invalid token signature")]
    InvalidSignature,
    /// Access token where a refresh token was expected, or the reverse
    #[error("wrong token type")]
    WrongKind,
    /// The expiry claim has passed
    #[error("token expired")]
    Expired,
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("system time error")]
    TimeError,
}
