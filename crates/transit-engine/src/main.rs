//! Engine binary for the Transit Live tracking service.
//!
//! This is the main entry point that wires together persistence, the
//! delay estimator, the simulation coordinator and the realtime hub. Every
//! service object is built once here and handed to its consumers; nothing
//! is reachable through globals.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `transit-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Open the trip store (`PostgreSQL` when configured, in-memory otherwise)
//! 4. Build the delay estimator
//! 5. Build the connection hub and its broadcast dispatcher
//! 6. Build the coordinator with the dispatcher as its event sink
//! 7. Spawn the tick loop, the retention loop and the hub server
//! 8. Wait for Ctrl-C, then stop everything within the grace period

mod error;
mod telemetry;

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use transit_core::memory::InMemoryStore;
use transit_core::{DelayEstimator, SimulationCoordinator, TransitConfig, TripStore};
use transit_db::{PgTripStore, PostgresConfig, PostgresPool};
use transit_hub::{
    AppState, BroadcastDispatcher, ConnectionHub, ServerConfig, StaticTokenVerifier, spawn_hub,
};

use crate::error::EngineError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "transit-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step fails. Failures after
/// startup are logged and contained by the subsystem that hit them.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let config = TransitConfig::load_or_default(Path::new(CONFIG_PATH))?;

    // 2. Initialize structured logging.
    telemetry::init(&config.logging);
    info!(
        tick_interval_ms = config.simulation.tick_interval_ms,
        base_speed_kmh = config.simulation.base_speed_kmh,
        delay_threshold_minutes = config.simulation.delay_threshold_minutes,
        port = config.hub.port,
        "transit-engine starting"
    );

    // 3. Open the trip store.
    let (store, pool) = open_store(&config).await?;

    // 4. Delay estimator.
    let estimator = DelayEstimator::from_config(&config.predictor)?;
    info!(estimator = estimator.name(), "Delay estimator ready");

    // 5. Hub and dispatcher.
    let verifier = StaticTokenVerifier::from_table(&config.hub.static_tokens)?;
    info!(tokens = verifier.len(), "Token verifier loaded");
    let hub = Arc::new(ConnectionHub::new(config.hub.clone(), Arc::new(verifier)));
    let sink = Arc::new(BroadcastDispatcher::new(Arc::clone(&hub)));

    // 6. Coordinator.
    let coordinator = Arc::new(SimulationCoordinator::new(&config, store, estimator, sink));

    // 7. Background tasks.
    let ticker = spawn_coordinator(&coordinator);
    let retention = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run_retention().await })
    };
    let server_config = ServerConfig {
        host: config.hub.host.clone(),
        port: config.hub.port,
    };
    let state = Arc::new(AppState::with_coordinator(
        Arc::clone(&hub),
        Arc::clone(&coordinator),
    ));
    let hub_tasks = spawn_hub(server_config, state)?;

    // 8. Run until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    coordinator.shutdown(ticker).await;
    join_quietly("retention", retention).await;

    hub_tasks.signal_shutdown();
    hub.request_stop();
    join_quietly("heartbeat", hub_tasks.heartbeat).await;
    let grace = config.simulation.shutdown_grace();
    let mut server = hub_tasks.server;
    if tokio::time::timeout(grace, &mut server).await.is_err() {
        warn!(
            grace_ms = config.simulation.shutdown_grace_ms,
            "hub server still draining sessions, aborting"
        );
        server.abort();
    }

    if let Some(pool) = pool {
        pool.close().await;
    }

    info!("transit-engine shutdown complete");
    Ok(())
}

/// Pick the store: `PostgreSQL` when a database URL is configured, the
/// in-memory store otherwise. The pool is returned so it can be closed on
/// shutdown.
async fn open_store(
    config: &TransitConfig,
) -> Result<(Arc<dyn TripStore>, Option<PostgresPool>), EngineError> {
    let Some(pg_config) = PostgresConfig::from_infrastructure(
        &config.infrastructure,
        config.simulation.io_timeout(),
    ) else {
        warn!("No database_url configured, using the in-memory store");
        let store: Arc<dyn TripStore> = Arc::new(InMemoryStore::new());
        return Ok((store, None));
    };

    let pool = PostgresPool::connect(&pg_config).await?;
    pool.run_migrations().await?;
    let store: Arc<dyn TripStore> = Arc::new(PgTripStore::new(pool.pool().clone()));
    Ok((store, Some(pool)))
}

fn spawn_coordinator(coordinator: &Arc<SimulationCoordinator>) -> JoinHandle<()> {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move { coordinator.run().await })
}

async fn join_quietly(name: &'static str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(task = name, error = %e, "background task ended abnormally");
    }
}
