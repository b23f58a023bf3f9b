//! manifoldd: Manifold repository server daemon.
//!
//! Serves the [`RepoGateway`](manifold::RepoGateway) over gRPC so every
//! controller replica shares one cache, one set of breakers and one
//! parallelism budget.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tonic::transport::Server;
use tracing::info;

use manifold::server::RepoService;
use manifold::server::config::{Config, LogFormat};
use manifold::server::proto::repo_server_server::RepoServerServer;
use manifold::{EmbeddedGateway, InvalidationSignal, Manifold, ManifoldError};

/// Manifold daemon: cached, rate-limited manifest generation.
#[derive(Parser)]
#[command(name = "manifoldd")]
#[command(version = manifold::PKG_VERSION)]
#[command(about = "Manifold repository server daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config).
    #[arg(short, long)]
    address: Option<String>,

    /// Maximum concurrent renders; below 1 means unlimited (overrides config and env).
    #[arg(long, allow_hyphen_values = true)]
    parallelism_limit: Option<i64>,

    /// Directory holding checked-out repositories (overrides config).
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Log filter, e.g. `info` or `manifold=debug` (overrides config).
    #[arg(long)]
    loglevel: Option<String>,

    /// Log line format (overrides config).
    #[arg(long, value_enum)]
    logformat: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;

    init_tracing(
        args.loglevel.as_deref().unwrap_or(&config.logging.level),
        args.logformat.unwrap_or(config.logging.format),
    );

    // Environment first, then flags
    config.apply_env();
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(limit) = args.parallelism_limit {
        config.server.limits.parallelism_limit = limit;
    }
    if let Some(root) = args.repo_root {
        config.renderer.root = root;
    }

    let gateway = Arc::new(build_gateway(&config)?);

    // Parse address
    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| ManifoldError::Configuration(format!("Invalid address: {e}")))?;

    let (signals, receiver) = mpsc::channel(16);
    manifold::spawn_invalidation_listener(Arc::clone(&gateway), receiver);
    spawn_reload_on_hangup(signals);

    info!(
        version = manifold::version_string(),
        %addr,
        repo_root = %config.renderer.root.display(),
        parallelism_limit = config.server.limits.parallelism_limit,
        pause_after = config.breaker.pause_after_failed_attempts,
        pause_minutes = config.breaker.pause_for_minutes,
        pause_requests = config.breaker.pause_for_requests,
        "manifoldd starting"
    );

    // Create gRPC service and start server
    let service = RepoService::new(gateway).with_request_timeout(config.request_timeout());
    Server::builder()
        .add_service(RepoServerServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    info!("manifoldd stopped");
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Build an [`EmbeddedGateway`] from configuration.
fn build_gateway(config: &Config) -> Result<EmbeddedGateway, ManifoldError> {
    Manifold::builder()
        .directory(&config.renderer.root)
        .generation(config.generation_config())
        .build()
}

/// SIGHUP drops every cached result (e.g. after repositories were re-synced
/// or the signing keyring changed on disk).
#[cfg(unix)]
fn spawn_reload_on_hangup(signals: mpsc::Sender<InvalidationSignal>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let Ok(mut hangups) = signal(SignalKind::hangup()) else {
            tracing::warn!("SIGHUP handler unavailable, cache reload disabled");
            return;
        };
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, invalidating all cached manifests");
            if signals.send(InvalidationSignal::All).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_signals: mpsc::Sender<InvalidationSignal>) {}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
