//! Risk Manager Service
//!
//! Order admission gateway with:
//! - Pre-trade risk validation
//! - Daily loss circuit breaker
//! - Background P&L and limits control loops
//! - Real-time risk broadcast over WebSocket
//! - Prometheus metrics and health reporting
//! - Graceful shutdown

use anyhow::{Context, Result};
use clap::Parser;
use risk_manager::cache::{FastCache, MemoryCache, RedisCache};
use risk_manager::config::RiskGateConfig;
use risk_manager::health::HealthProbe;
use risk_manager::monitor::{ControlLoops, LimitsReloader, PendingSweeper, PnlMonitor};
use risk_manager::server::{self, AppContext};
use risk_manager::store::{MemoryRiskStore, PgRiskStore, RiskStore};
use risk_manager::{OrderGateway, PositionLedger, RiskManager, ThrottleGate};
use services_common::{BroadcastHub, EngineApi, EngineClient};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "risk-manager";

#[derive(Debug, Parser)]
#[command(name = SERVICE_NAME, version, about = "Risk control and order admission gateway")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    info!("Starting Risk Manager Service v{}", env!("CARGO_PKG_VERSION"));

    let config = RiskGateConfig::load(args.config.as_deref())?;

    let store = build_store(&config).await?;
    let cache = build_cache(&config).await?;

    let engine = Arc::new(EngineClient::tcp(
        &config.endpoints.engine_address,
        config.engine.clone(),
    ));
    if let Err(e) = engine.connect().await {
        warn!(address = %config.endpoints.engine_address, error = %e, "Engine not reachable yet, will retry on first request");
    }
    let engine: Arc<dyn EngineApi> = engine;

    let (hub, hub_task) = BroadcastHub::spawn(config.broadcast.clone());
    let throttle = ThrottleGate::new(Arc::clone(&cache), config.throttle.mode());
    let risk = Arc::new(RiskManager::new(store, Arc::clone(&cache), throttle, hub.clone()));
    risk.bootstrap().await;

    let ledger = Arc::new(PositionLedger::new(Arc::clone(&engine), cache));
    let gateway = Arc::new(OrderGateway::new(Arc::clone(&risk), Arc::clone(&ledger)));
    let health = Arc::new(HealthProbe::new(Arc::clone(&risk), engine));

    let mut loops = ControlLoops::new();
    loops.spawn(
        Arc::new(PnlMonitor::new(Arc::clone(&risk), Arc::clone(&ledger))),
        config.loops.pnl_interval(),
    );
    loops.spawn(
        Arc::new(LimitsReloader::new(Arc::clone(&risk))),
        config.loops.limits_reload(),
    );
    loops.spawn(
        Arc::new(PendingSweeper::new(Arc::clone(&ledger))),
        config.loops.pending_sweep(),
    );

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;
    let ctx = Arc::new(AppContext {
        risk,
        gateway,
        ledger,
        health,
        default_identity: config.throttle.default_identity.clone(),
    });

    let served = server::serve(ctx, addr, shutdown_signal()).await;
    if let Err(e) = &served {
        error!("HTTP server error: {}", e);
    }

    loops.shutdown(config.loops.shutdown_grace()).await;
    hub.shutdown().await;
    if let Err(e) = hub_task.await {
        warn!("Broadcast hub ended abnormally: {}", e);
    }

    info!("Risk Manager Service shutdown complete");
    served
}

/// Initialize tracing
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,services_common=info,warp=warn", SERVICE_NAME.replace('-', "_")).into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

async fn build_store(config: &RiskGateConfig) -> Result<Arc<dyn RiskStore>> {
    match &config.endpoints.database_url {
        Some(url) => {
            let store = PgRiskStore::connect(url, config.store.max_connections)
                .await
                .context("connecting to durable store")?;
            store.ensure_schema().await.context("preparing durable store schema")?;
            info!("Durable store connected");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database URL configured, using in-memory durable store");
            Ok(Arc::new(MemoryRiskStore::new()))
        }
    }
}

async fn build_cache(config: &RiskGateConfig) -> Result<Arc<dyn FastCache>> {
    match &config.endpoints.redis_url {
        Some(url) => {
            let cache = RedisCache::connect(url).await?;
            Ok(Arc::new(cache))
        }
        None => {
            warn!("No redis URL configured, using in-memory fast cache");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
