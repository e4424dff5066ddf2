//! Session → backend endpoint resolution.
//!
//! [`SessionRegistry::resolve`] serves from the [`EndpointCache`] while an
//! entry is fresh and otherwise asks the durable [`SessionStore`] through
//! the registry [`Policy`].

pub mod cache;
pub mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::resilience::Policy;

pub use cache::{CacheStats, EndpointCache};
pub use store::{HttpSessionStore, SessionRecord, SessionStatus, SessionStore, StaticSessionStore};

// ── Endpoint ─────────────────────────────────────────────────────

/// Host/port of a backend desktop speaking RFB.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── SessionRegistry ──────────────────────────────────────────────

/// Shared, explicitly owned registry handed to the bridge at startup.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    cache: EndpointCache,
    policy: Policy,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, cache: EndpointCache, policy: Policy) -> Self {
        Self {
            store,
            cache,
            policy,
        }
    }

    /// Resolve `session_id` to its backend endpoint.
    ///
    /// Every failure of the durable path (unknown session, session not
    /// running, retries exhausted, circuit open) is reported as
    /// [`BridgeError::SessionNotFound`]. Cancellation is passed through.
    pub async fn resolve(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Endpoint, BridgeError> {
        if let Some(endpoint) = self.cache.get(session_id).await {
            debug!(session_id, %endpoint, "endpoint cache hit");
            return Ok(endpoint);
        }

        let store = Arc::clone(&self.store);
        let lookup = self
            .policy
            .call(cancel, BridgeError::is_retryable, || {
                let store = Arc::clone(&store);
                async move { store.get_session(session_id).await }
            })
            .await;

        let record = match lookup {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(session_id, "session not found in registry");
                return Err(BridgeError::SessionNotFound(session_id.to_string()));
            }
            Err(BridgeError::Cancelled) => return Err(BridgeError::Cancelled),
            Err(e) => {
                warn!(session_id, "registry lookup failed: {e}");
                return Err(BridgeError::SessionNotFound(session_id.to_string()));
            }
        };

        match record.routable_endpoint() {
            Some(endpoint) => {
                self.cache.insert(session_id, endpoint.clone()).await;
                info!(session_id, %endpoint, "resolved session endpoint");
                Ok(endpoint.clone())
            }
            None => {
                info!(session_id, status = ?record.status, "session has no routable endpoint");
                Err(BridgeError::SessionNotFound(session_id.to_string()))
            }
        }
    }

    /// Drop cached endpoints whose session id contains `pattern`.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let removed = self.cache.invalidate(pattern).await;
        info!(pattern, removed, "invalidated endpoint cache entries");
        removed
    }

    pub async fn purge_expired(&self) -> usize {
        self.cache.purge_expired().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

// ── Tests ────────────────────────────────────────────────────────
