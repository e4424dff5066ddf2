//! Configuration for the bridge service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use deskbridge_core::rfb::placeholder;
use deskbridge_core::{
    BridgeConfig, CircuitBreakerConfig, ClientOptions, ClientVariant, Endpoint, InputTiming,
    Policy, RetryConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listener.
    pub server: ListenConfig,
    /// Session lookup.
    pub registry: RegistryConfig,
    /// Backend protocol client.
    pub backend: BackendConfig,
    /// Retry and circuit breaking per call category.
    pub resilience: ResilienceConfig,
    /// Streaming session behaviour.
    pub streaming: StreamingConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Address the HTTP/WebSocket server binds.
    pub listen: String,
}

/// Where session endpoints come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the session-management API. Empty means only the
    /// static `sessions` table is consulted.
    pub session_api_url: String,
    /// Per-request timeout for the session API.
    pub request_timeout_ms: u64,
    /// How long a resolved endpoint is served from cache.
    pub cache_ttl_secs: u64,
    /// VNC port assumed when a session record omits one.
    pub default_vnc_port: u16,
    /// Fixed sessions, for development and tests.
    pub sessions: Vec<StaticSession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSession {
    pub id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Protocol client: "framed" or "raw".
    pub client: ClientVariant,
    pub connect_timeout_ms: u64,
    /// Deadline for one framebuffer capture.
    pub capture_timeout_ms: u64,
    /// Time a mouse button is held during a click.
    pub click_hold_ms: u64,
    /// Pause between typed characters.
    pub type_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub registry_retry: RetryConfig,
    pub registry_breaker: CircuitBreakerConfig,
    pub connect_retry: RetryConfig,
    pub connect_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Period of pushed screenshots; 0 disables them.
    pub screenshot_interval_ms: u64,
    /// Deadline for resolve + connect.
    pub setup_timeout_ms: u64,
    /// Outbound frames queued per session.
    pub outbound_buffer: usize,
    pub placeholder_width: u32,
    pub placeholder_height: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, e.g. "info" or "deskbridge_core=debug".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_api_url: String::new(),
            request_timeout_ms: 5_000,
            cache_ttl_secs: 300,
            default_vnc_port: 5900,
            sessions: Vec::new(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            client: ClientVariant::Framed,
            connect_timeout_ms: 10_000,
            capture_timeout_ms: 5_000,
            click_hold_ms: 100,
            type_delay_ms: 50,
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            registry_retry: RetryConfig::registry(),
            registry_breaker: CircuitBreakerConfig::default(),
            connect_retry: RetryConfig::connect(),
            connect_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            screenshot_interval_ms: 1_000,
            setup_timeout_ms: 30_000,
            outbound_buffer: 64,
            placeholder_width: placeholder::DEFAULT_WIDTH,
            placeholder_height: placeholder::DEFAULT_HEIGHT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// A config file that exists but cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ServerConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.registry.cache_ttl_secs)
    }

    pub fn static_sessions(&self) -> impl Iterator<Item = (String, Endpoint)> + '_ {
        self.registry
            .sessions
            .iter()
            .map(|s| (s.id.clone(), Endpoint::new(s.host.clone(), s.port)))
    }

    pub fn registry_policy(&self) -> Policy {
        Policy::new(
            "registry",
            self.resilience.registry_retry.clone(),
            self.resilience.registry_breaker.clone(),
        )
    }

    pub fn connect_policy(&self) -> Policy {
        Policy::new(
            "connect",
            self.resilience.connect_retry.clone(),
            self.resilience.connect_breaker.clone(),
        )
    }

    pub fn client_options(&self) -> ClientOptions {
        let b = &self.backend;
        ClientOptions {
            variant: b.client,
            connect_timeout: Duration::from_millis(b.connect_timeout_ms.max(1)),
            capture_timeout: Duration::from_millis(b.capture_timeout_ms.max(1)),
            timing: InputTiming {
                click_hold: Duration::from_millis(b.click_hold_ms),
                type_delay: Duration::from_millis(b.type_delay_ms),
            },
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        let s = &self.streaming;
        BridgeConfig {
            setup_timeout: Duration::from_millis(s.setup_timeout_ms.max(1)),
            screenshot_interval: Duration::from_millis(s.screenshot_interval_ms),
            placeholder_size: (s.placeholder_width.max(1), s.placeholder_height.max(1)),
            outbound_buffer: s.outbound_buffer.max(1),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        assert!(text.contains("listen"));
        assert!(text.contains("cache_ttl_secs"));
        assert!(text.contains("client = \"framed\""));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.listen, "0.0.0.0:8080");
        assert_eq!(parsed.registry.default_vnc_port, 5900);
        assert_eq!(parsed.resilience.registry_retry, RetryConfig::registry());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: ServerConfig = toml::from_str(
            r#"
            [backend]
            client = "raw"

            [[registry.sessions]]
            id = "abc"
            host = "10.0.0.5"
            port = 5901
            "#,
        )
        .unwrap();
        assert_eq!(parsed.backend.client, ClientVariant::Raw);
        assert_eq!(parsed.backend.click_hold_ms, 100);
        assert_eq!(
            parsed.static_sessions().collect::<Vec<_>>(),
            vec![("abc".to_string(), Endpoint::new("10.0.0.5", 5901))]
        );
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn zero_interval_disables_pushes() {
        let mut cfg = ServerConfig::default();
        cfg.streaming.screenshot_interval_ms = 0;
        cfg.streaming.outbound_buffer = 0;
        let bridge = cfg.bridge_config();
        assert!(bridge.screenshot_interval.is_zero());
        assert_eq!(bridge.outbound_buffer, 1);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServerConfig::load(Path::new("/nonexistent/deskbridge.toml")).unwrap();
        assert_eq!(cfg.streaming.setup_timeout_ms, 30_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!(
            "deskbridge-malformed-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[backend\nclient = ").unwrap();
        let result = ServerConfig::load(&path);
        let _ = std::fs::remove_file(&path);

        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("deskbridge-malformed-"));
    }
}
