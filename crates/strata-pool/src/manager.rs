//! PoolManager: the pool lifecycle orchestrator.
//!
//! Every administrative pool operation follows the same outline: resolve
//! the target pool against the catalog, take the pool lock, run the
//! operation's engine protocol through the dispatcher, update the catalog,
//! and release the lock on the way out. Engine statuses are handed back
//! in the response rather than turned into errors.

use std::time::Duration;

use strata_core::Status;
use strata_core::config::PoolConfig;
use strata_core::rank::ranks_to_u32;
use strata_dispatch::{Dispatcher, RetryPolicy};
use strata_engine::Method;
use strata_engine::rpc::{PoolGetPropReq, PoolPropResp, PoolQueryReq, PoolQueryResp};
use strata_state::{PoolService, SystemDb};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PoolError, PoolResult};
use crate::property;
use crate::types::*;

/// Orchestrates pool operations over the catalog and the local engines.
#[derive(Clone)]
pub struct PoolManager {
    pub(crate) sysdb: SystemDb,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) config: PoolConfig,
    pub(crate) system: String,
    pub(crate) create_retry: RetryPolicy,
}

impl PoolManager {
    pub fn new(
        sysdb: SystemDb,
        dispatcher: Dispatcher,
        config: PoolConfig,
        system: impl Into<String>,
    ) -> Self {
        let create_retry = RetryPolicy::from(&config.create_retry);
        Self {
            sysdb,
            dispatcher,
            config,
            system: system.into(),
            create_retry,
        }
    }

    pub fn sysdb(&self) -> &SystemDb {
        &self.sysdb
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.config.sweep_interval_secs.max(1))
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Map an identifier onto a pool UUID without requiring a record.
    ///
    /// Labels must resolve; a UUID is returned as given.
    pub fn resolve_uuid(&self, id: &PoolId) -> PoolResult<Uuid> {
        match id {
            PoolId::Uuid(uuid) if uuid.is_nil() => Err(PoolError::InvalidUuid),
            PoolId::Uuid(uuid) => Ok(*uuid),
            PoolId::Label(label) => self
                .sysdb
                .find_pool_by_label(label)?
                .map(|ps| ps.uuid)
                .ok_or_else(|| PoolError::PoolNotFound(label.clone())),
        }
    }

    /// Fetch a pool that must exist and be Ready.
    pub(crate) fn ready_pool(&self, uuid: Uuid) -> PoolResult<PoolService> {
        let ps = self
            .sysdb
            .find_pool_by_uuid(&uuid)?
            .ok_or_else(|| PoolError::PoolNotFound(uuid.to_string()))?;
        if !ps.is_ready() {
            return Err(PoolError::NotReady {
                uuid,
                state: ps.state,
            });
        }
        Ok(ps)
    }

    /// Look up a pool record by UUID or label.
    pub fn find(&self, id: &PoolId) -> PoolResult<PoolService> {
        let uuid = self.resolve_uuid(id)?;
        self.sysdb
            .find_pool_by_uuid(&uuid)?
            .ok_or_else(|| PoolError::PoolNotFound(id.to_string()))
    }

    // ── Read-only operations ───────────────────────────────────────

    /// Ready pools, or every record when `all` is set.
    pub fn list(&self, all: bool) -> PoolResult<Vec<PoolService>> {
        Ok(self.sysdb.pool_service_list(all)?)
    }

    pub async fn query(&self, id: &PoolId) -> PoolResult<PoolQueryResponse> {
        let uuid = self.resolve_uuid(id)?;
        let ps = self.ready_pool(uuid)?;

        let req = PoolQueryReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
        };
        let resp: PoolQueryResp = self.dispatcher.call_local(Method::PoolQuery, &req).await?;
        if !resp.status.is_success() {
            warn!(pool = %uuid, status = %resp.status, "pool query failed");
            return Ok(PoolQueryResponse {
                status: resp.status,
                uuid,
                ..Default::default()
            });
        }

        Ok(PoolQueryResponse {
            status: Status::Success,
            uuid,
            label: ps.label,
            svc_reps: ps.replicas,
            total_targets: resp.total_targets,
            active_targets: resp.active_targets,
            disabled_targets: resp.disabled_targets,
            total_engines: resp.total_engines,
            leader: Some(resp.leader.into()),
            version: resp.version,
            tier_stats: resp.tier_stats,
            rebuild: resp.rebuild,
        })
    }

    pub async fn get_prop(&self, req: &PoolGetPropRequest) -> PoolResult<PoolPropResponse> {
        let uuid = self.resolve_uuid(&req.id)?;
        let ps = self.ready_pool(uuid)?;
        let numbers = req
            .names
            .iter()
            .map(|n| property::number_for(n))
            .collect::<PoolResult<Vec<_>>>()?;

        let engine_req = PoolGetPropReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
            numbers,
        };
        let resp: PoolPropResp = self
            .dispatcher
            .call_local(Method::PoolGetProp, &engine_req)
            .await?;
        if !resp.status.is_success() {
            return Ok(PoolPropResponse {
                status: resp.status,
                properties: Vec::new(),
            });
        }

        let properties = resp
            .properties
            .iter()
            .map(property::from_engine)
            .collect::<PoolResult<Vec<_>>>()?;
        debug!(pool = %uuid, count = properties.len(), "pool properties fetched");
        Ok(PoolPropResponse {
            status: Status::Success,
            properties,
        })
    }
}
