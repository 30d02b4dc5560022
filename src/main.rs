//! Tiered Response Cache
//!
//! Caching reverse proxy in front of a file-processing origin.
//!
//! ```text
//!   client ──► ApiServer ──► CachingHandler ──► UpstreamProxy ──► origin
//!                  │               │
//!                  │               └── Memory / Edge / Durable tiers
//!                  └── /_cache/*, /healthz, /readyz, /metrics
//! ```

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiered_response_cache::cache::storage::FileKvStoreConfig;
use tiered_response_cache::telemetry::TracingMetricsSink;
use tiered_response_cache::{
    with_caching, ApiServer, CacheLayerConfig, CacheService, DurableBackend, InMemoryEdgeCache, UpstreamProxy,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered Response Cache - adaptive multi-tier cache for file-processing services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    /// Origin base URL (overrides the config file)
    #[arg(long, env = "UPSTREAM_URL")]
    upstream_url: Option<String>,

    /// Directory for the file-backed durable tier
    #[arg(long, env = "DURABLE_DIR")]
    durable_dir: Option<PathBuf>,

    /// Run an in-process edge tier (no external CDN)
    #[arg(long, env = "LOCAL_EDGE")]
    local_edge: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args).await?;

    info!("Starting Tiered Response Cache");
    info!("  Version: {}", tiered_response_cache::VERSION);
    info!("  Listen: {}", config.server.listen_addr);
    info!("  Upstream: {}", config.upstream.base_url);
    info!("  Local edge: {}", args.local_edge);

    let upstream = UpstreamProxy::new(config.upstream.clone()).context("failed to create upstream client")?;

    let mut builder = CacheService::builder()
        .config(config)
        .metrics_sink(Arc::new(TracingMetricsSink));
    if args.local_edge {
        builder = builder.edge_cache(Arc::new(InMemoryEdgeCache::new()));
    }
    let service = builder.build().await.context("failed to build cache service")?;
    service.start();

    let server = Arc::new(ApiServer::new(Arc::new(with_caching(upstream, service.clone()))));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_server.shutdown();
    });

    let result = server.run().await;
    service.shutdown().await;
    result.context("API server failed")?;

    info!("Shutdown complete");
    Ok(())
}

async fn load_config(args: &Args) -> anyhow::Result<CacheLayerConfig> {
    let mut config = match &args.config {
        Some(path) => CacheLayerConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CacheLayerConfig::default(),
    };

    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }
    if let Some(url) = &args.upstream_url {
        config.upstream.base_url = url.clone();
    }
    if let Some(dir) = &args.durable_dir {
        config.durable = DurableBackend::File(FileKvStoreConfig {
            root_path: dir.clone(),
            ..Default::default()
        });
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=info".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("axum=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
