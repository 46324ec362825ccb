//! Pool operations on an existing Ready pool: extend, evict, target state
//! changes and property updates.

use std::collections::BTreeSet;

use strata_core::rank::ranks_to_u32;
use strata_core::{Rank, RankSet, Status};
use strata_engine::Method;
use strata_engine::rpc::{
    PoolEvictReq, PoolEvictResp, PoolExtendReq, PoolExtendResp, PoolPropResp, PoolRankTargetsReq,
    PoolSetPropReq, StatusResp,
};
use strata_state::{MemberState, epoch_secs};
use tracing::{debug, info, warn};

use crate::error::{PoolError, PoolResult};
use crate::manager::PoolManager;
use crate::property::{self, PROP_LABEL};
use crate::types::*;

/// Target state change applied to one rank of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOp {
    Exclude,
    Drain,
    Reintegrate,
}

impl TargetOp {
    fn method(self) -> Method {
        match self {
            TargetOp::Exclude => Method::PoolExclude,
            TargetOp::Drain => Method::PoolDrain,
            TargetOp::Reintegrate => Method::PoolReintegrate,
        }
    }
}

impl PoolManager {
    /// Add joined ranks to a pool.
    pub async fn extend(&self, req: &PoolExtendRequest) -> PoolResult<PoolExtendResponse> {
        let uuid = self.resolve_uuid(&req.id)?;
        let lock = self.sysdb.lock_pool(uuid).await?;
        let mut ps = self.ready_pool(uuid)?;

        if req.ranks.is_empty() {
            return Err(PoolError::NoRanks);
        }
        let joined: BTreeSet<Rank> = self
            .sysdb
            .member_ranks(Some(MemberState::Joined))?
            .into_iter()
            .collect();
        let invalid: RankSet = req
            .ranks
            .iter()
            .copied()
            .filter(|r| !joined.contains(r))
            .collect();
        if !invalid.is_empty() {
            return Err(PoolError::InvalidRanks(invalid));
        }
        let already: RankSet = req
            .ranks
            .iter()
            .copied()
            .filter(|r| ps.storage_ranks.contains(r))
            .collect();
        if !already.is_empty() {
            return Err(PoolError::InvalidRequest(format!(
                "ranks {already} already belong to pool {uuid}"
            )));
        }

        let new_ranks: BTreeSet<Rank> = req.ranks.iter().copied().collect();
        let all_ranks: Vec<Rank> = ps
            .storage_ranks
            .iter()
            .copied()
            .chain(new_ranks.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let fault_domains = self.sysdb.fault_domain_tree(&all_ranks)?.to_compressed()?;

        let engine_req = PoolExtendReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
            ranks: new_ranks.iter().map(|r| r.as_u32()).collect(),
            tier_bytes: ps.tier_bytes.clone(),
            fault_domains,
        };
        let resp: PoolExtendResp = self
            .dispatcher
            .call_local(Method::PoolExtend, &engine_req)
            .await?;
        if !resp.status.is_success() {
            warn!(pool = %uuid, status = %resp.status, "pool extend failed");
            return Ok(PoolExtendResponse {
                status: resp.status,
                tier_bytes: Vec::new(),
            });
        }

        ps.storage_ranks = all_ranks;
        if !resp.tier_bytes.is_empty() {
            ps.tier_bytes = resp.tier_bytes;
        }
        ps.updated_at = epoch_secs();
        self.sysdb.update_pool_service(&lock, &ps)?;
        info!(pool = %uuid, ranks = %RankSet::from_iter(new_ranks), "pool extended");

        Ok(PoolExtendResponse {
            status: Status::Success,
            tier_bytes: ps.tier_bytes,
        })
    }

    /// Evict pool handles; no handles means every handle.
    pub async fn evict(&self, req: &PoolEvictRequest) -> PoolResult<PoolEvictResponse> {
        let uuid = self.resolve_uuid(&req.id)?;
        let _lock = self.sysdb.lock_pool(uuid).await?;
        let ps = self.ready_pool(uuid)?;

        let engine_req = PoolEvictReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
            handles: req.handles.clone(),
            destroy: false,
            force_destroy: false,
        };
        let resp: PoolEvictResp = self.dispatcher.call_local(Method::PoolEvict, &engine_req).await?;
        debug!(pool = %uuid, status = %resp.status, count = resp.count, "pool evict");
        Ok(PoolEvictResponse {
            status: resp.status,
            count: resp.count,
        })
    }

    pub async fn exclude(&self, req: &PoolRankTargetsRequest) -> PoolResult<StatusResponse> {
        self.rank_targets(TargetOp::Exclude, req).await
    }

    pub async fn drain(&self, req: &PoolRankTargetsRequest) -> PoolResult<StatusResponse> {
        self.rank_targets(TargetOp::Drain, req).await
    }

    pub async fn reintegrate(&self, req: &PoolRankTargetsRequest) -> PoolResult<StatusResponse> {
        self.rank_targets(TargetOp::Reintegrate, req).await
    }

    async fn rank_targets(
        &self,
        op: TargetOp,
        req: &PoolRankTargetsRequest,
    ) -> PoolResult<StatusResponse> {
        let uuid = self.resolve_uuid(&req.id)?;
        let _lock = self.sysdb.lock_pool(uuid).await?;
        let ps = self.ready_pool(uuid)?;

        if self.sysdb.find_member_by_rank(req.rank)?.is_none() {
            return Err(PoolError::InvalidRanks([req.rank].into_iter().collect()));
        }
        let targets = self
            .dispatcher
            .engines()
            .iter()
            .next()
            .map(|e| e.target_count())
            .unwrap_or(0);
        if targets == 0 {
            return Err(PoolError::ZeroTargetCount);
        }
        if let Some(bad) = req.target_idx.iter().find(|&&idx| idx >= targets) {
            return Err(PoolError::InvalidRequest(format!(
                "target index {bad} out of range, rank has {targets} targets"
            )));
        }

        let engine_req = PoolRankTargetsReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
            rank: req.rank.as_u32(),
            target_idx: req.target_idx.clone(),
        };
        let resp: StatusResp = self.dispatcher.call_local(op.method(), &engine_req).await?;
        if resp.status.is_success() {
            info!(pool = %uuid, rank = %req.rank, targets = ?req.target_idx, ?op, "pool targets updated");
        } else {
            warn!(pool = %uuid, rank = %req.rank, ?op, status = %resp.status, "pool target update failed");
        }
        Ok(resp.status.into())
    }

    /// Set pool properties and verify the engine applied them verbatim.
    ///
    /// A `label` property also relabels the catalog record; an empty label
    /// clears it.
    pub async fn set_prop(&self, req: &PoolSetPropRequest) -> PoolResult<PoolPropResponse> {
        let uuid = self.resolve_uuid(&req.id)?;
        let lock = self.sysdb.lock_pool(uuid).await?;
        let mut ps = self.ready_pool(uuid)?;

        if req.properties.is_empty() {
            return Err(PoolError::InvalidRequest("no properties given".to_string()));
        }
        let props = req
            .properties
            .iter()
            .map(property::to_engine)
            .collect::<PoolResult<Vec<_>>>()?;

        let new_label = props
            .iter()
            .rev()
            .find(|p| p.number == PROP_LABEL)
            .map(|p| p.value.to_string());
        if let Some(label) = new_label.as_deref().filter(|l| !l.is_empty()) {
            match self.sysdb.find_pool_by_label(label)? {
                Some(owner) if owner.uuid != uuid => {
                    return Err(PoolError::DuplicateLabel {
                        label: label.to_string(),
                        owner: owner.uuid,
                    });
                }
                _ => {}
            }
        }

        let engine_req = PoolSetPropReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
            properties: props.clone(),
        };
        let resp: PoolPropResp = self
            .dispatcher
            .call_local(Method::PoolSetProp, &engine_req)
            .await?;
        if !resp.status.is_success() {
            warn!(pool = %uuid, status = %resp.status, "pool set-prop failed");
            return Ok(PoolPropResponse {
                status: resp.status,
                properties: Vec::new(),
            });
        }
        property::verify_echo(&props, &resp.properties)?;

        if let Some(label) = new_label {
            ps.label = Some(label).filter(|l| !l.is_empty());
            ps.updated_at = epoch_secs();
            self.sysdb.update_pool_service(&lock, &ps)?;
        }

        let properties = resp
            .properties
            .iter()
            .map(property::from_engine)
            .collect::<PoolResult<Vec<_>>>()?;
        info!(pool = %uuid, count = properties.len(), "pool properties set");
        Ok(PoolPropResponse {
            status: Status::Success,
            properties,
        })
    }
}
