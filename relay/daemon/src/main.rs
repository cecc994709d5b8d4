//! Relay Daemon - Multi-Model Streaming Chat Relay Server
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8080, OpenRouter upstream)
//! relay-daemon
//!
//! # With config file
//! relay-daemon --config /etc/chat-relay/relay.toml
//!
//! # Custom listen address and upstream
//! relay-daemon --bind 0.0.0.0:9000 --upstream-url http://localhost:4000/v1
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use relay_core::{
    config::{default_config_path, load_config_from_path, ConfigOverrides},
    ChatRelay, CompositeRateLimiter, ModelId, OpenRouterBackend,
};
use relay_daemon::server::{router, AppState};

/// Relay Daemon - Streams chat completions from one or more models
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short = 'b', long, env = "RELAY_BIND_ADDR", value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Base URL of the OpenRouter-compatible upstream
    #[arg(long, env = "RELAY_UPSTREAM_URL", value_name = "URL")]
    upstream_url: Option<String>,

    /// Default model for auto mode
    #[arg(long, env = "RELAY_DEFAULT_MODEL", value_name = "MODEL")]
    default_model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> Result<ConfigOverrides> {
        let mut overrides = ConfigOverrides::new();
        if let Some(addr) = self.bind {
            overrides = overrides.with_bind_addr(addr);
        }
        if let Some(ref url) = self.upstream_url {
            overrides = overrides.with_upstream_url(url.clone());
        }
        if let Some(ref raw) = self.default_model {
            let model = ModelId::parse(raw.as_str())
                .with_context(|| format!("Invalid --default-model '{raw}'"))?;
            overrides = overrides.with_default_model(model);
        }
        Ok(overrides)
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level},tower_http={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Relay Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides()?.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = %config.source(),
        bind_addr = %config.bind_addr,
        upstream = %config.upstream.base_url,
        default_model = %config.roles.default_model,
        "Configuration loaded"
    );

    let backend = OpenRouterBackend::new(config.upstream.clone()).context("Failed to create upstream client")?;
    let relay = ChatRelay::new(Arc::new(backend), Arc::new(config.catalog()), config.relay_settings());

    let limiter = Arc::new(CompositeRateLimiter::new(config.rate_limit.clone()));
    let sweeper = limiter.spawn_sweeper();

    let state = AppState::new(relay, Arc::clone(&limiter), config.stream.channel_capacity);
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
