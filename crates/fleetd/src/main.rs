//! Benchmark fleet service
//!
//! Serves fleet snapshots, lifecycle operations with streamed output,
//! compatibility fixes and resource stats over HTTP.

use anyhow::Result;
use fleet_core::{
    health::{components, HealthRegistry},
    observability::{FleetMetrics, StructuredLogger},
    CatalogSync, CompatibilityPatcher, DaemonGateway, DockerGateway, FleetCatalog,
    LifecycleController, ProbePaths, ResourceProbe, UnitLocks,
};
use fleetd::{api, config::FleetConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = FleetConfig::load()?;
    let logger = StructuredLogger::new(hostname());
    logger.log_startup(SERVICE_VERSION, &config.benchmarks_dir.display().to_string());

    if config.api_token.is_none() {
        warn!("FLEET_API_TOKEN is not set; every /api request will be refused");
    }

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DAEMON).await;
    health_registry.register(components::CATALOG).await;
    health_registry.register(components::PROBE).await;

    let gateway: Arc<dyn DaemonGateway> =
        Arc::new(DockerGateway::connect(config.docker_socket.as_deref()));
    let info = gateway.daemon_info().await;
    health_registry.record_daemon(&info).await;
    info!(
        connected = info.connected,
        version = ?info.version,
        "Container daemon probed"
    );

    let catalog = Arc::new(FleetCatalog::new(config.catalog_config(), gateway));
    let lifecycle = Arc::new(LifecycleController::new(
        catalog.clone(),
        config.lifecycle_config(),
    ));
    let probe =
        ResourceProbe::new(ProbePaths::default()).with_sample_window(config.cpu_sample_window());

    let state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics: FleetMetrics::new(),
        catalog,
        lifecycle,
        patcher: Arc::new(CompatibilityPatcher::new()),
        probe: Arc::new(probe),
        sync: Arc::new(CatalogSync::new(config.sync_config())),
        locks: UnitLocks::new(),
        api_token: config.api_token.clone(),
        log_tail_lines: config.log_tail_lines,
    });

    health_registry.set_ready(true).await;

    let server = tokio::spawn(api::serve(config.api_port, state));

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    logger.log_shutdown("API server failed");
                    return Err(e);
                }
                Err(e) => {
                    logger.log_shutdown("API server task aborted");
                    return Err(e.into());
                }
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
    }

    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "fleetd".to_string())
}
