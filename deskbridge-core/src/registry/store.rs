//! Durable session lookups.
//!
//! The session-management service owns session lifecycle; all the bridge
//! needs from it is "get session → {status, endpoint}".

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BridgeError;
use crate::registry::Endpoint;

// ── SessionRecord ────────────────────────────────────────────────

/// Lifecycle status reported by the session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[serde(alias = "starting", alias = "provisioning")]
    Pending,
    Running,
    #[serde(alias = "terminated", alias = "deprovisioning")]
    Stopped,
    #[serde(other)]
    Unknown,
}

/// One session as the durable store knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub status: SessionStatus,
    pub endpoint: Option<Endpoint>,
}

impl SessionRecord {
    pub fn running(endpoint: Endpoint) -> Self {
        Self {
            status: SessionStatus::Running,
            endpoint: Some(endpoint),
        }
    }

    /// The endpoint, if this session can be connected to right now.
    pub fn routable_endpoint(&self) -> Option<&Endpoint> {
        match self.status {
            SessionStatus::Running => self.endpoint.as_ref(),
            _ => None,
        }
    }
}

// ── SessionStore ─────────────────────────────────────────────────

/// The durable lookup behind the endpoint cache.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `Ok(None)` when the session does not exist.
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, BridgeError>;
}

// ── HttpSessionStore ─────────────────────────────────────────────

/// Wire shape of `GET /sessions/{id}`.
#[derive(Debug, Deserialize)]
struct SessionBody {
    status: SessionStatus,
    #[serde(alias = "task_ip", alias = "private_ip", alias = "endpoint_host")]
    host: Option<String>,
    #[serde(alias = "vnc_port", alias = "endpoint_port")]
    port: Option<u16>,
}

/// Looks sessions up in the session-management HTTP API.
pub struct HttpSessionStore {
    client: reqwest::Client,
    base_url: Url,
    default_port: u16,
}

impl HttpSessionStore {
    pub fn new(base_url: &str, default_port: u16, timeout: Duration) -> Result<Self, BridgeError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BridgeError::Other(format!("invalid session API URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::Other(format!(
                "session API URL {base_url} cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            default_port,
        })
    }

    /// `{base}/sessions/{id}`, with the id escaped as one path segment.
    fn session_url(&self, session_id: &str) -> Result<Url, BridgeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                BridgeError::Other(format!("session API URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .push("sessions")
            .push(session_id);
        Ok(url)
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, BridgeError> {
        let url = self.session_url(session_id)?;
        debug!("registry GET {url}");

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BridgeError::Registry {
                status: status.as_u16(),
            });
        }

        let body: SessionBody = resp.json().await?;
        let endpoint = body.host.filter(|h| !h.is_empty()).map(|host| Endpoint {
            host,
            port: body.port.unwrap_or(self.default_port),
        });
        Ok(Some(SessionRecord {
            status: body.status,
            endpoint,
        }))
    }
}

// ── StaticSessionStore ───────────────────────────────────────────

/// In-memory store, seeded from configuration.
#[derive(Default)]
pub struct StaticSessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl StaticSessionStore {
    pub fn with_sessions<I>(sessions: I) -> Self
    where
        I: IntoIterator<Item = (String, Endpoint)>,
    {
        let map = sessions
            .into_iter()
            .map(|(id, ep)| (id, SessionRecord::running(ep)))
            .collect();
        Self {
            sessions: RwLock::new(map),
        }
    }
}

#[async_trait]
impl SessionStore for StaticSessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, BridgeError> {
        Ok(self.sessions.read().get(session_id).cloned())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_body_accepts_task_ip() {
        let body: SessionBody = serde_json::from_str(
            r#"{"session_id":"abc","status":"running","task_ip":"10.0.0.5","user_id":"u"}"#,
        )
        .unwrap();
        assert_eq!(body.status, SessionStatus::Running);
        assert_eq!(body.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(body.port, None);
    }

    #[test]
    fn unknown_status_is_not_routable() {
        let body: SessionBody =
            serde_json::from_str(r#"{"status":"draining","endpoint_host":"h"}"#).unwrap();
        assert_eq!(body.status, SessionStatus::Unknown);

        let starting: SessionBody = serde_json::from_str(r#"{"status":"starting"}"#).unwrap();
        assert_eq!(starting.status, SessionStatus::Pending);
    }

    #[test]
    fn only_running_sessions_route() {
        let ep = Endpoint::new("10.0.0.5", 5900);
        assert!(SessionRecord::running(ep.clone()).routable_endpoint().is_some());
        let stopped = SessionRecord {
            status: SessionStatus::Stopped,
            endpoint: Some(ep),
        };
        assert!(stopped.routable_endpoint().is_none());
    }

    fn store(base: &str) -> HttpSessionStore {
        HttpSessionStore::new(base, 5900, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn session_id_stays_one_path_segment() {
        let store = store("http://sessions.local/");
        assert_eq!(
            store.session_url("a b/c").unwrap().as_str(),
            "http://sessions.local/sessions/a%20b%2Fc"
        );
        let url = store.session_url("x?admin=1#frag").unwrap();
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(url.path_segments().unwrap().count(), 2);
    }

    #[test]
    fn base_path_is_kept() {
        assert_eq!(
            store("https://api.local/v1").session_url("abc").unwrap().as_str(),
            "https://api.local/v1/sessions/abc"
        );
        assert_eq!(
            store("https://api.local/v1/").session_url("abc").unwrap().as_str(),
            "https://api.local/v1/sessions/abc"
        );
    }

    #[test]
    fn unusable_base_urls_are_rejected() {
        for base in ["not a url", "mailto:ops@example.com"] {
            assert!(matches!(
                HttpSessionStore::new(base, 5900, Duration::from_secs(1)),
                Err(BridgeError::Other(_))
            ));
        }
    }

    #[tokio::test]
    async fn static_store_lookup() {
        let store = StaticSessionStore::with_sessions([(
            "abc".to_string(),
            Endpoint::new("10.0.0.5", 5900),
        )]);
        let rec = store.get_session("abc").await.unwrap().unwrap();
        assert_eq!(rec.endpoint.unwrap().port, 5900);
        assert!(store.get_session("zzz").await.unwrap().is_none());
    }
}
