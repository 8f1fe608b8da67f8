//! Client side of the token protocol.
//!
//! [`SessionContext`] holds the current pair and makes sure that however
//! many calls fail authentication at once, only one refresh exchange goes
//! over the wire. [`ApiClient`] is the `reqwest` transport built on top.

mod coordinator;
mod http;
mod session;

pub use coordinator::{
    ExchangeError, RefreshCoordinator, RefreshExchange, RefreshOutcome, SessionError, Ticket,
};
pub use http::{ApiClient, ApiResponse, ClientError, HttpRefreshExchange};
pub use session::SessionContext;
