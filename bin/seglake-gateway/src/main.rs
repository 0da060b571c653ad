//! Seglake Gateway binary

use anyhow::Result;
use axum::Router;
use clap::Parser;
use seglake_common::{GatewayConfig, HlcClock};
use seglake_engine::SegmentEngine;
use seglake_gateway::{Gateway, maintenance, pipeline};
use seglake_meta::{ApiKeyRecord, MemMetaStore, MetaStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "seglake-gateway")]
#[command(about = "Seglake S3-compatible gateway")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    listen: String,

    /// Root access key
    #[arg(long, env = "SEGLAKE_ROOT_ACCESS_KEY", default_value = "seglake")]
    root_access_key: String,

    /// Root secret key
    #[arg(long, env = "SEGLAKE_ROOT_SECRET_KEY", default_value = "")]
    root_secret_key: String,

    /// Region required in credential scopes
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Serve virtual-hosted-style addressing
    #[arg(long, default_value_t = false)]
    virtual_hosted: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(path))
                .build()?;
            settings.try_deserialize()?
        }
        None => GatewayConfig::default(),
    };
    config.auth.root_access_key = args.root_access_key.clone();
    config.auth.root_secret_key = args.root_secret_key.clone();
    config.auth.region = args.region.clone();
    config.virtual_hosted = args.virtual_hosted;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Seglake Gateway");

    let config = load_config(&args)?;
    if config.auth.root_secret_key.is_empty() {
        anyhow::bail!("a root secret key is required (--root-secret-key)");
    }

    let clock = Arc::new(HlcClock::new());
    let engine = Arc::new(SegmentEngine::new(clock.clone()));
    let meta = Arc::new(MemMetaStore::new(clock.clone()));

    // The root key is also a regular API-key row so replication peers
    // can authenticate against it.
    meta.put_api_key(ApiKeyRecord {
        access_key: config.auth.root_access_key.clone(),
        secret_key: config.auth.root_secret_key.clone(),
        policy: None,
        enabled: true,
        server: true,
    })
    .await?;

    let gw = Gateway::new(config, clock, engine, meta);

    tokio::spawn(maintenance::run_loop(gw.clone()));

    // Periodic sweep of idle auth-failure buckets
    {
        let gw = gw.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                gw.failure_limiter.cleanup(std::time::Instant::now());
            }
        });
    }

    // One fallback service: the dispatch table is semantic, not a set
    // of independent routes.
    let app = Router::new()
        .fallback(pipeline::handle)
        .layer(TraceLayer::new_for_http())
        .with_state(gw);

    let addr: SocketAddr = args
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", args.listen, e))?;
    info!("Serving S3 API on {addr}");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    })
    .await?;

    info!("Gateway shut down gracefully");
    Ok(())
}
