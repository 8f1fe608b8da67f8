//! Client session state and reactive refresh.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::coordinator::{
    ExchangeError, RefreshCoordinator, RefreshExchange, RefreshOutcome, SessionError, Ticket,
};
use crate::jwt::TokenPair;

/// Tokens of one logged-in client plus the coordination of their renewal.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    tokens: RwLock<Option<TokenPair>>,
    coordinator: RefreshCoordinator,
    exchange: Arc<dyn RefreshExchange>,
}

impl SessionContext {
    pub fn new(exchange: impl RefreshExchange) -> Self {
        Self::with_exchange(Arc::new(exchange))
    }

    pub fn with_exchange(exchange: Arc<dyn RefreshExchange>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                tokens: RwLock::new(None),
                coordinator: RefreshCoordinator::new(),
                exchange,
            }),
        }
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.inner
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens().map(|pair| pair.access_token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens().is_some()
    }

    /// Replace the held pair, e.g. after login or an out-of-band rotation.
    pub fn adopt(&self, pair: TokenPair) {
        *self
            .inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(pair);
    }

    pub fn clear(&self) {
        *self
            .inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_in_flight()
    }

    /// Get a pair to replay a call with after the server rejected
    /// `rejected_access` (the access token that call carried, if any).
    ///
    /// Concurrent callers share a single refresh exchange.
    pub async fn refresh_after_rejection(&self, rejected_access: Option<&str>) -> RefreshOutcome {
        let receiver = match self.inner.coordinator.enlist() {
            Ticket::Follower(rx) => rx,
            Ticket::Leader(rx) => {
                self.lead(rejected_access);
                rx
            }
        };

        receiver.await.unwrap_or_else(|_| {
            Err(SessionError::Network(
                "refresh ended without a result".to_string(),
            ))
        })
    }

    fn lead(&self, rejected_access: Option<&str>) {
        let Some(held) = self.tokens() else {
            debug!("No tokens held, session expired");
            self.inner
                .coordinator
                .complete(Err(SessionError::SessionExpired));
            return;
        };

        if rejected_access != Some(held.access_token.as_str()) {
            debug!("Tokens changed since the failed call, reusing them");
            self.inner.coordinator.complete(Ok(held));
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            let outcome = session.run_exchange(held.refresh_token).await;
            session.inner.coordinator.complete(outcome);
        });
    }

    async fn run_exchange(&self, sent_refresh: String) -> RefreshOutcome {
        match self.inner.exchange.exchange(sent_refresh.clone()).await {
            Ok(pair) => {
                info!("Refreshed session tokens");
                self.adopt(pair.clone());
                Ok(pair)
            }
            Err(ExchangeError::Rejected) => {
                let mut tokens = self
                    .inner
                    .tokens
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                match tokens.as_ref() {
                    // Rotated out-of-band while the exchange was running
                    Some(current) if current.refresh_token != sent_refresh => Ok(current.clone()),
                    _ => {
                        warn!("Refresh token rejected, session expired");
                        *tokens = None;
                        Err(SessionError::SessionExpired)
                    }
                }
            }
            Err(ExchangeError::Network(e)) => {
                warn!(error = %e, "Refresh exchange failed");
                Err(SessionError::Network(e))
            }
        }
    }
}
