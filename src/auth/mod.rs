//! JWT authentication with transparent token renewal.
//!
//! Dual-token system: short-lived access tokens (15 min, stateless) and
//! refresh tokens (7 days) whose opaque store form lives on the user row.
//! Access tokens close to expiry are rotated by the proactive middleware;
//! clients rotate reactively through `/auth/refresh`.

mod bearer;
mod errors;
mod extractors;
mod ip;
mod issuer;
mod proactive;
pub mod revocation;
mod state;
mod types;

pub use bearer::get_bearer_token;
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{Auth, BearerToken};
pub use ip::{ClientIpSource, HasHeadersAndExtensions, extract_client_ip};
pub use issuer::{IssueError, IssuedSession, Issuer};
pub use proactive::{
    NEW_ACCESS_TOKEN_HEADER, NEW_REFRESH_TOKEN_HEADER, NEW_TOKENS_FIELD, RENEWAL_WINDOW_SECS,
    TOKENS_ROTATED_HEADER, proactive_refresh, within_renewal_window,
};
pub use state::HasAuthBackend;
pub use types::{AuthenticatedUser, UserInfo};
