//! Background cleanup of pool records stuck in Creating or Destroying.
//!
//! A leader that crashes mid-create or mid-destroy leaves a record behind
//! in an intermediate state. The sweep forces such records to Destroying
//! and drives a forced destroy to completion. It runs once when the
//! sweeper starts, again whenever this instance gains leadership, and then
//! periodically. Periodic passes leave Creating records alone because a
//! create may be in flight on another task.

use std::time::Duration;

use strata_state::{PoolServiceState, epoch_secs};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::PoolResult;
use crate::manager::PoolManager;

impl PoolManager {
    /// Clean up every non-Ready record. Returns how many were removed.
    pub async fn sweep(&self, ignore_creating: bool) -> PoolResult<usize> {
        if !self.sysdb.is_leader() {
            debug!("not leader, skipping pool sweep");
            return Ok(0);
        }

        let mut removed = 0;
        let stale: Vec<_> = self
            .sysdb
            .pool_service_list(true)?
            .into_iter()
            .filter(|ps| !ps.is_ready())
            .collect();

        for candidate in stale {
            if ignore_creating && candidate.state == PoolServiceState::Creating {
                debug!(pool = %candidate.uuid, "skipping creating pool");
                continue;
            }

            let lock = self.sysdb.lock_pool(candidate.uuid).await?;
            // Re-read under the lock; an in-flight operation may have
            // finished while we waited.
            let Some(mut ps) = self.sysdb.find_pool_by_uuid(&candidate.uuid)? else {
                continue;
            };
            if ps.is_ready() {
                continue;
            }

            warn!(pool = %ps.uuid, state = %ps.state, "sweeping stale pool record");
            if ps.state != PoolServiceState::Destroying {
                ps.state = PoolServiceState::Destroying;
                ps.updated_at = epoch_secs();
                self.sysdb.update_pool_service(&lock, &ps)?;
            }

            match self.destroy_on_engines(&ps, true, true).await {
                Ok(status) if status.is_success() => {
                    self.sysdb.remove_pool_service(&lock, ps.uuid)?;
                    info!(pool = %ps.uuid, "stale pool removed");
                    removed += 1;
                }
                Ok(status) => warn!(pool = %ps.uuid, %status, "sweep destroy failed"),
                Err(e) => warn!(pool = %ps.uuid, error = %e, "sweep destroy failed"),
            }
        }
        Ok(removed)
    }
}

/// Periodic driver for [`PoolManager::sweep`].
pub struct Sweeper {
    manager: PoolManager,
    interval: Duration,
}

impl Sweeper {
    pub fn new(manager: PoolManager) -> Self {
        let interval = manager.sweep_interval();
        Self { manager, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn pass(&self, ignore_creating: bool) {
        match self.manager.sweep(ignore_creating).await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "pool sweep complete"),
            Err(e) => error!(error = %e, "pool sweep failed"),
        }
    }

    /// Run until `shutdown` changes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "pool sweeper started");

        let mut was_leader = self.manager.sysdb().is_leader();
        self.pass(false).await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let leader = self.manager.sysdb().is_leader();
                    if leader {
                        self.pass(was_leader).await;
                    }
                    was_leader = leader;
                }
                _ = shutdown.changed() => {
                    info!("pool sweeper shutting down");
                    break;
                }
            }
        }
    }
}
