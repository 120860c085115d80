use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally::config::{SharedStorageConfig, StorageConfig, TallyConfig};
use tally::ratelimit::{FixedWindowLimiter, MemoryStorage, SharedStorage, Storage};
use tally::server::HttpServer;

/// Fixed-window rate limiting demo service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Storage backend
    #[arg(long, value_enum)]
    storage: Option<StorageKind>,

    /// Maximum calls per user in each window
    #[arg(long)]
    max: Option<u64>,

    /// Window length in seconds
    #[arg(long)]
    window: Option<u64>,

    /// HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Redis connection URL (with `--storage redis`)
    #[arg(long)]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageKind {
    Memory,
    Redis,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(self, mut config: TallyConfig) -> TallyConfig {
        if let Some(max) = self.max {
            config.limiter.max_calls = max;
        }
        if let Some(window) = self.window {
            config.limiter.window_secs = window;
        }
        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        match self.storage {
            Some(StorageKind::Memory) => config.storage = StorageConfig::Memory,
            Some(StorageKind::Redis) if config.storage == StorageConfig::Memory => {
                config.storage = StorageConfig::Redis(SharedStorageConfig::default())
            }
            _ => {}
        }
        if let (Some(url), StorageConfig::Redis(redis)) = (self.redis_url, &mut config.storage) {
            redis.url = url;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tally Rate Limiting Demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TallyConfig::load(args.config.as_deref())?;
    let config = args.apply(config);
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        max_calls = config.limiter.max_calls,
        window_secs = config.limiter.window_secs,
        storage = ?config.storage,
        "Configuration loaded"
    );

    let storage: Box<dyn Storage> = match &config.storage {
        StorageConfig::Memory => Box::new(MemoryStorage::new()),
        StorageConfig::Redis(redis) => Box::new(SharedStorage::connect(redis).await?),
    };

    let limiter = Arc::new(FixedWindowLimiter::with_storage(
        config.limiter.max_calls,
        config.limiter.window(),
        storage,
    )?);
    info!("Rate limiter initialized");

    let server = HttpServer::new(config.server.listen_addr, Arc::clone(&limiter));
    server.serve_with_shutdown(shutdown_signal()).await?;

    limiter.close().await?;
    info!("Tally Rate Limiting Demo stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
