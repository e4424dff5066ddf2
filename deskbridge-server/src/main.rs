//! deskbridge service entry point.
//!
//! ```text
//! deskbridge                        Run with deskbridge.toml (or defaults)
//! deskbridge --config <path>        Load a custom config TOML
//! deskbridge --gen-config           Write default config to stdout
//! deskbridge --listen 0.0.0.0:9000  Override the listen address
//! deskbridge --session-api <url>    Override the session API base URL
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deskbridge_server::app;
use deskbridge_server::config::ServerConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "deskbridge", about = "Remote-desktop protocol bridge")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "deskbridge.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Address to listen on (overrides the config file).
    #[arg(long)]
    listen: Option<String>,

    /// Session-management API base URL (overrides the config file).
    #[arg(long)]
    session_api: Option<String>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Logging is not up yet; a load error reaches stderr through main.
    let mut config = ServerConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(url) = cli.session_api {
        config.registry.session_api_url = url;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("deskbridge v{}", env!("CARGO_PKG_VERSION"));
    if !cli.config.exists() {
        info!("no config at {}; using defaults", cli.config.display());
    }
    info!("listen: {}", config.server.listen);
    info!("backend client: {}", config.backend.client);
    info!("cache ttl: {}s", config.registry.cache_ttl_secs);

    let cancel = CancellationToken::new();

    // Ctrl-C handler.
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    app::run(config, cancel).await
}
