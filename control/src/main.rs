mod api;
mod services;
mod types;

use anyhow::{bail, Result};
use clap::Parser;
use podwatch_monitor::config::{MAX_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL};
use podwatch_monitor::{MonitorConfig, Poller};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use api::AppState;
use services::poll_scheduler;

#[derive(Parser, Debug)]
#[command(name = "podwatch-control")]
#[command(about = "Pod network monitor", long_about = None)]
struct Args {
    /// Bind address for HTTP server
    #[arg(long, env = "PODWATCH_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Bootstrap pod hosts, tried in the given order
    #[arg(long, env = "PODWATCH_BOOTSTRAP", value_delimiter = ',', required = true)]
    bootstrap: Vec<String>,

    /// RPC port the bootstrap pods listen on
    #[arg(long, env = "PODWATCH_RPC_PORT", default_value_t = 6000)]
    rpc_port: u16,

    /// Per-call RPC timeout in milliseconds
    #[arg(long, env = "PODWATCH_RPC_TIMEOUT_MS", default_value_t = 8000)]
    rpc_timeout_ms: u64,

    /// Seconds between poll cycles (15-300)
    #[arg(long, env = "PODWATCH_REFRESH_SECS", default_value_t = 30)]
    refresh_secs: u64,

    /// Seconds a discovered roster is reused before asking a bootstrap again
    #[arg(long, env = "PODWATCH_ROSTER_TTL_SECS", default_value_t = 0)]
    roster_ttl_secs: u64,

    /// Also query pods whose last-seen age marks them offline
    #[arg(long, env = "PODWATCH_FETCH_OFFLINE")]
    fetch_offline: bool,

    /// ip-api compatible geolocation endpoint
    #[arg(long, env = "PODWATCH_GEO_URL", default_value = "http://ip-api.com")]
    geo_url: String,

    /// Disable geolocation lookups
    #[arg(long, env = "PODWATCH_GEO_DISABLED")]
    geo_disabled: bool,

    /// Log level
    #[arg(long, env = "PODWATCH_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn refresh_interval(&self) -> Result<Duration> {
        let interval = Duration::from_secs(self.refresh_secs);
        if interval < MIN_REFRESH_INTERVAL || interval > MAX_REFRESH_INTERVAL {
            bail!(
                "--refresh-secs must be between {} and {}, got {}",
                MIN_REFRESH_INTERVAL.as_secs(),
                MAX_REFRESH_INTERVAL.as_secs(),
                self.refresh_secs
            );
        }
        Ok(interval)
    }

    fn rpc_timeout(&self) -> Result<Duration> {
        if self.rpc_timeout_ms == 0 {
            bail!("--rpc-timeout-ms must be greater than 0");
        }
        Ok(Duration::from_millis(self.rpc_timeout_ms))
    }

    fn monitor_config(&self) -> Result<MonitorConfig> {
        Ok(MonitorConfig {
            bootstrap_hosts: self
                .bootstrap
                .iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            rpc_port: self.rpc_port,
            rpc_timeout: self.rpc_timeout()?,
            roster_ttl: Duration::from_secs(self.roster_ttl_secs),
            fetch_offline: self.fetch_offline,
            geo_url: (!self.geo_disabled).then(|| self.geo_url.clone()),
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting podwatch control service");

    let refresh_interval = args.refresh_interval()?;
    let config = args.monitor_config()?;
    if config.bootstrap_hosts.is_empty() {
        bail!("At least one bootstrap host is required");
    }

    info!(
        "Bootstrap order: {} (port {}), refresh every {:?}, rpc timeout {:?}",
        config.bootstrap_hosts.join(", "),
        config.rpc_port,
        refresh_interval,
        config.rpc_timeout
    );

    let poller = Arc::new(Poller::new(config)?);

    // Start poll scheduler in background
    let scheduler_poller = poller.clone();
    tokio::spawn(async move {
        poll_scheduler(scheduler_poller, refresh_interval).await;
    });

    let state = Arc::new(AppState { poller });
    let app = api::create_router(state);

    // Parse bind address
    let addr: SocketAddr = args.bind.parse()?;
    info!("Listening on http://{}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("podwatch control service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
