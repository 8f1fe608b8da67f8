//! Authentication user types.

use serde::{Deserialize, Serialize};

use crate::db::User;
use crate::jwt::AccessClaims;

/// Authenticated user information extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// JWT claims from the access token
    pub claims: AccessClaims,
}

impl AuthenticatedUser {
    pub fn user_uuid(&self) -> &str {
        &self.claims.sub
    }
}

/// Public view of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uuid: String,
    pub email: String,
    pub name: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            uuid: user.uuid.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}
