//! # Immune Control Plane - Main Server
//!
//! Entry point for the agent-fleet immune control plane: loads configuration,
//! wires the persistence store/cache and enforcement/executor backends,
//! spawns the orchestrator's tick loop, and serves the HTTP control surface.

use std::sync::Arc;
use std::time::Duration;

use immune_control_plane::immune::enforcement::{
    CompositeEnforcement, ContainerEnforcement, EnforcementStrategy, GatewayEnforcement, ProcessEnforcement,
};
use immune_control_plane::immune::executor::{ContainerExecutor, GatewayExecutor, HealingExecutor, ProcessExecutor, SimulatedExecutor};
use immune_control_plane::immune::Orchestrator;
use immune_control_plane::infrastructure::cache::LocalCache;
use immune_control_plane::infrastructure::store::{MemoryStore, SqliteStore, Store};
use immune_control_plane::utils::config::{ImmuneConfig, StoreBackend};
use immune_control_plane::utils::health_check::{HealthCheckManager, StandardHealthChecks};
use immune_control_plane::utils::rate_limiter::RateLimiters;
use immune_control_plane::utils::security::SecurityAuditor;
use immune_control_plane::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn init_tracing(config: &ImmuneConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Tries gateway policy injection, then process signals, then container
/// orchestration, in order — the first strategy that succeeds wins (§4.8
/// Composite).
fn build_enforcement() -> Arc<dyn EnforcementStrategy> {
    let gateway_url = std::env::var("IMMUNE_GATEWAY_URL").ok();
    let strategies: Vec<Box<dyn EnforcementStrategy>> = vec![
        Box::new(GatewayEnforcement::new(gateway_url)),
        Box::new(ProcessEnforcement::new()),
        Box::new(ContainerEnforcement::new()),
    ];
    Arc::new(CompositeEnforcement::new(strategies))
}

/// Picks the healing executor backend from `IMMUNE_EXECUTOR` (`simulated`
/// (default), `gateway`, `process`, `container`).
fn build_executor() -> Arc<dyn HealingExecutor> {
    match std::env::var("IMMUNE_EXECUTOR").unwrap_or_default().as_str() {
        "gateway" => Arc::new(GatewayExecutor::new()),
        "process" => Arc::new(ProcessExecutor::new()),
        "container" => Arc::new(ContainerExecutor::new(Some(Box::new(SimulatedExecutor::new())))),
        _ => Arc::new(SimulatedExecutor::new()),
    }
}

async fn build_store(config: &ImmuneConfig, run_id: &str) -> Arc<dyn Store> {
    match config.store.backend {
        StoreBackend::Sqlite => match SqliteStore::open(&config.store.sqlite_path, run_id) {
            Ok(store) => Arc::new(store) as Arc<dyn Store>,
            Err(e) => {
                warn!(error = %e, "failed to open sqlite store, falling back to in-memory store");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        },
        StoreBackend::Memory => Arc::new(MemoryStore::new()) as Arc<dyn Store>,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(ImmuneConfig::load().unwrap_or_else(|e| {
        eprintln!("failed to load configuration, using defaults: {e}");
        ImmuneConfig::default()
    }));

    init_tracing(&config);
    info!(port = config.server.port, "starting immune control plane");

    let cache = match LocalCache::load(&config.cache.dir, Uuid::new_v4().to_string()).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "local cache unavailable, continuing without restart cache");
            None
        }
    };

    let run_id = match &cache {
        Some(cache) => cache.run_id().await,
        None => Uuid::new_v4().to_string(),
    };

    let store = build_store(&config, &run_id).await;
    let enforcement = build_enforcement();
    let executor = build_executor();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        enforcement,
        executor,
        Some(Arc::clone(&store)),
        cache.clone(),
    ));

    let health = Arc::new(HealthCheckManager::new());
    health.register_check("store".to_string(), StandardHealthChecks::store_check()).await;
    health.register_check("telemetry".to_string(), StandardHealthChecks::telemetry_freshness_check()).await;
    health.register_check("cache".to_string(), StandardHealthChecks::cache_check()).await;
    Arc::clone(&health).start_monitoring(Duration::from_secs(30));

    let app_state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::clone(&config),
        rate_limiters: Arc::new(RateLimiters::new()),
        security_auditor: Arc::new(SecurityAuditor::new(true)),
        health,
    };

    let tick_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    let cache_flush_handle = cache.map(|cache| {
        let interval = Duration::from_secs(config.cache.flush_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.flush_if_dirty().await {
                    warn!(error = %e, "periodic cache flush failed");
                }
            }
        })
    });

    let app = immune_control_plane::server::create_router(app_state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    let shutdown_token = orchestrator.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining in-flight healing tasks");
            shutdown_token.cancel();
        })
        .await?;

    if let Some(handle) = cache_flush_handle {
        handle.abort();
    }
    if let Err(e) = tick_handle.await {
        error!(error = %e, "orchestrator tick loop panicked");
    }

    Ok(())
}
