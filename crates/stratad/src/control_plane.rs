//! Control plane: system database, local engines, pool orchestration and
//! the admin REST API in one process.
//!
//! The daemon:
//! 1. Opens the system database under the data directory
//! 2. Builds a handle per configured engine and starts the join loop
//! 3. Wires the dispatcher, pool manager and SMD service over those handles
//! 4. Runs background tasks (join loop, pool sweeper, evict batcher)
//! 5. Serves the REST API until Ctrl-C
//!
//! The catalog is not replicated; this instance is always the leader.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use strata_api::ApiState;
use strata_core::StrataConfig;
use strata_dispatch::{Dispatcher, RetryPolicy, SmdService};
use strata_engine::{Engine, EngineSet, LocalEngine};
use strata_pool::{EvictBatcher, PoolManager, Sweeper};
use strata_state::{StateStore, SystemDb};
use tokio::sync::watch;
use tracing::{error, info};

use crate::engines::{JoinLoop, engine_uuid};

const JOIN_INTERVAL: Duration = Duration::from_secs(5);

/// Run the control plane node.
pub async fn run_control_plane(config: StrataConfig, address: String) -> anyhow::Result<()> {
    info!(system = %config.name, "Strata daemon starting");
    std::fs::create_dir_all(&config.data_dir)?;

    // ── System database ──────────────────────────────────────────
    let db_path = config.data_dir.join("strata.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "system database opened");

    let sysdb = SystemDb::new(store);
    sysdb.set_leader(true, Some(address.clone()));

    // ── Local engines ────────────────────────────────────────────
    let request_timeout = Duration::from_secs(config.pool.request_timeout_secs);
    let member_addr = format!("{address}:{}", config.api_port);
    let mut joiner = JoinLoop::new(sysdb.clone(), member_addr, JOIN_INTERVAL);
    let mut engines = EngineSet::new();
    for (idx, ec) in config.engines.iter().enumerate() {
        let index = u32::try_from(idx)?;
        let engine = Arc::new(LocalEngine::new(index, &ec.socket, ec.targets).with_timeout(request_timeout));
        let uuid = engine_uuid(&config.data_dir, index)?;
        joiner.add(Arc::clone(&engine), uuid, ec.fault_domain.clone());
        engines.push(engine as Arc<dyn Engine>);
    }
    info!(count = engines.len(), "engine handles created");

    // ── Pool orchestration ───────────────────────────────────────
    let dispatcher = Dispatcher::new(engines).with_timeout(request_timeout);
    let pools = PoolManager::new(sysdb, dispatcher.clone(), config.pool.clone(), config.name.clone());
    let smd = SmdService::new(dispatcher, RetryPolicy::from(&config.smd.replace_retry));

    // ── Background tasks ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let join_shutdown = shutdown_rx.clone();
    let join_handle = tokio::spawn(async move {
        joiner.run(join_shutdown).await;
    });

    let sweeper = Sweeper::new(pools.clone());
    let sweep_shutdown = shutdown_rx.clone();
    let sweep_handle = tokio::spawn(async move {
        sweeper.run(sweep_shutdown).await;
    });

    let (evictions, evict_handle) = EvictBatcher::spawn(
        pools.clone(),
        Duration::from_millis(config.pool.evict_batch_window_ms),
        shutdown_rx,
    );

    // ── REST API server ──────────────────────────────────────────
    let router = strata_api::build_router(ApiState {
        pools,
        evictions,
        smd,
    });
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));

    info!(%api_addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(api_addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = join_handle.await;
    let _ = sweep_handle.await;
    let _ = evict_handle.await;

    info!("control plane stopped");
    Ok(())
}
