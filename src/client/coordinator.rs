//! Single-flight coordination of refresh exchanges.

use std::sync::{Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::jwt::TokenPair;

/// Failure of one refresh exchange with the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// The server refused the refresh token.
    #[error("refresh token rejected")]
    Rejected,
    /// The exchange did not complete: connection failure, timeout, or an
    /// unexpected response.
    #[error("refresh exchange failed: {0}")]
    Network(String),
}

/// What callers waiting on a refresh see when it fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session is over; the user has to log in again.
    #[error("session expired")]
    SessionExpired,
    #[error("network failure during refresh: {0}")]
    Network(String),
}

pub type RefreshOutcome = Result<TokenPair, SessionError>;

/// Performs the refresh call. Separated from the transport so the
/// coordinator can be driven without a server.
pub trait RefreshExchange: Send + Sync + 'static {
    fn exchange(&self, refresh_token: String)
    -> BoxFuture<'static, Result<TokenPair, ExchangeError>>;
}

enum RefreshState {
    Idle,
    InFlight(Vec<oneshot::Sender<RefreshOutcome>>),
}

/// A caller's place in the current refresh.
pub enum Ticket {
    /// No refresh was running; this caller must start one.
    Leader(oneshot::Receiver<RefreshOutcome>),
    /// A refresh is already running; wait for its outcome.
    Follower(oneshot::Receiver<RefreshOutcome>),
}

/// Waiter queue for the refresh in flight, if any.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Join the refresh in flight, or become the leader of a new one.
    pub fn enlist(&self) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *state {
            RefreshState::Idle => {
                *state = RefreshState::InFlight(vec![tx]);
                Ticket::Leader(rx)
            }
            RefreshState::InFlight(waiters) => {
                waiters.push(tx);
                Ticket::Follower(rx)
            }
        }
    }

    /// Finish the refresh in flight and release every waiter with `outcome`.
    /// Returns how many waiters were released.
    pub fn complete(&self, outcome: RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::InFlight(waiters) => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };
        let released = waiters.len();
        for waiter in waiters {
            // Receivers of abandoned calls are gone
            let _ = waiter.send(outcome.clone());
        }
        released
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            RefreshState::InFlight(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(n: u32) -> TokenPair {
        TokenPair {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
        }
    }

    #[tokio::test]
    async fn test_first_enlist_leads_rest_follow() {
        let coordinator = RefreshCoordinator::new();
        assert!(!coordinator.is_in_flight());

        let leader = coordinator.enlist();
        let follower = coordinator.enlist();
        assert!(matches!(leader, Ticket::Leader(_)));
        assert!(matches!(follower, Ticket::Follower(_)));
        assert!(coordinator.is_in_flight());

        assert_eq!(coordinator.complete(Ok(pair(1))), 2);
        assert!(!coordinator.is_in_flight());

        for ticket in [leader, follower] {
            let (Ticket::Leader(rx) | Ticket::Follower(rx)) = ticket;
            assert_eq!(rx.await.unwrap(), Ok(pair(1)));
        }
    }

    #[tokio::test]
    async fn test_new_refresh_after_completion() {
        let coordinator = RefreshCoordinator::new();
        let _ = coordinator.enlist();
        coordinator.complete(Err(SessionError::SessionExpired));

        assert!(matches!(coordinator.enlist(), Ticket::Leader(_)));
    }

    #[test]
    fn test_complete_when_idle_releases_nobody() {
        let coordinator = RefreshCoordinator::new();
        assert_eq!(coordinator.complete(Ok(pair(1))), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_block_others() {
        let coordinator = RefreshCoordinator::new();
        let leader = coordinator.enlist();
        drop(coordinator.enlist());

        assert_eq!(coordinator.complete(Ok(pair(2))), 2);
        let Ticket::Leader(rx) = leader else {
            panic!("first enlist must lead");
        };
        assert_eq!(rx.await.unwrap(), Ok(pair(2)));
    }
}
