//! Service wiring: builds the shared bridge from configuration and runs
//! the HTTP server until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use deskbridge_core::{
    Bridge, BridgeError, ClientFactory, EndpointCache, HttpSessionStore, SessionRegistry,
    SessionStore, StaticSessionStore,
};

use crate::config::ServerConfig;
use crate::routes;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    /// Cancelled on shutdown; each session runs under a child token.
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(bridge: Bridge, cancel: CancellationToken) -> Self {
        Self { bridge, cancel }
    }
}

/// Build the registry, client factory and breakers once for the process.
pub fn build_bridge(config: &ServerConfig) -> Result<Bridge, BridgeError> {
    let store: Arc<dyn SessionStore> = if config.registry.session_api_url.is_empty() {
        info!(
            sessions = config.registry.sessions.len(),
            "using static session table"
        );
        Arc::new(StaticSessionStore::with_sessions(config.static_sessions()))
    } else {
        info!(url = %config.registry.session_api_url, "using session API");
        Arc::new(HttpSessionStore::new(
            &config.registry.session_api_url,
            config.registry.default_vnc_port,
            Duration::from_millis(config.registry.request_timeout_ms.max(1)),
        )?)
    };

    let registry = SessionRegistry::new(
        store,
        EndpointCache::new(config.cache_ttl()),
        config.registry_policy(),
    );
    let factory = ClientFactory::new(config.client_options());

    Ok(Bridge::new(
        Arc::new(registry),
        factory,
        config.connect_policy(),
        config.bridge_config(),
    ))
}

/// Drop expired cache entries every TTL until cancelled.
pub fn spawn_cache_purger(bridge: Bridge, ttl: Duration, cancel: CancellationToken) {
    if ttl.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + ttl, ttl);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = bridge.registry().purge_expired().await;
                    if purged > 0 {
                        debug!(purged, "purged expired endpoint cache entries");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}

/// Bind `config.server.listen` and serve until `cancel` fires.
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
    let bridge = build_bridge(&config)?;
    spawn_cache_purger(bridge.clone(), config.cache_ttl(), cancel.clone());

    let listener = TcpListener::bind(&config.server.listen).await?;
    info!("deskbridge listening on {}", listener.local_addr()?);

    let app = routes::router(AppState::new(bridge, cancel.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("deskbridge stopped");
    Ok(())
}
