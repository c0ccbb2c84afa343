//! DSS Fulfillment Engine (dss-fulfill) - Main entry point
//!
//! Loads configuration, starts the fulfillment session (actor resolution,
//! bulk fetch, live feed) and serves the local HTTP/SSE API until Ctrl+C or
//! SIGTERM.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dss_common::events::EventBus;
use dss_fulfill::api::{self, AppContext};
use dss_fulfill::client::FulfillClient;
use dss_fulfill::config::{Config, ConfigOverrides};
use dss_fulfill::feed::WsTransport;
use dss_fulfill::Session;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "dss_fulfill=debug,dss_common=info,tower_http=debug";
const EVENT_BUS_CAPACITY: usize = 1000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Command-line arguments for dss-fulfill
#[derive(Parser, Debug)]
#[command(name = "dss-fulfill")]
#[command(about = "Live fulfillment record engine for the DSS console")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the local HTTP/SSE API
    #[arg(short, long, env = "DSS_FULFILL_PORT")]
    port: Option<u16>,

    /// Fulfillment API base URL
    #[arg(long, env = "DSS_API_URL")]
    api_url: Option<String>,

    /// Live feed WebSocket URL
    #[arg(long, env = "DSS_WS_URL")]
    ws_url: Option<String>,

    /// Bearer token used as-is
    #[arg(long, env = "DSS_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Refresh token for OpenID Connect token refresh
    #[arg(long, env = "DSS_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        port: args.port,
        api_url: args.api_url,
        ws_url: args.ws_url,
        access_token: args.access_token,
        refresh_token: args.refresh_token,
    };
    let config = Config::load(args.config.as_deref(), overrides)
        .context("Failed to load configuration")?;

    init_tracing(&config)?;

    info!("Starting DSS Fulfillment Engine v{}", env!("CARGO_PKG_VERSION"));
    if config.uses_defaults() {
        warn!("No config file found; using built-in defaults");
    } else {
        info!("Configuration: {}", config.source);
    }
    info!("API: {}  Live feed: {}", config.api_url, config.ws_url);

    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let credentials = Arc::new(config.credentials(http.clone()));
    let client = Arc::new(FulfillClient::new(
        http,
        config.api_url.clone(),
        credentials,
        config.min_validity(),
    ));

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let session = Session::spawn(
        client.clone(),
        config.feed_config(),
        WsTransport::new(),
        event_bus.clone(),
    );

    let ctx = AppContext {
        session: session.clone(),
        client,
        event_bus,
    };
    api::run(config.port, ctx, shutdown_signal())
        .await
        .context("HTTP server error")?;

    session.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over `logging.level`; both fall back to the built-in filter.
fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match &config.logging.level {
            Some(level) => EnvFilter::try_new(level),
            None => Ok(EnvFilter::new(DEFAULT_LOG_FILTER)),
        })
        .context("Invalid logging.level")?;

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
