//! Pool creation.
//!
//! The Creating record is written before any engine is asked to allocate
//! storage, so a crash or leadership change after that point leaves a
//! record the sweep can clean up. What must be undone after the engine
//! call is decided once, by [`Compensation::after_create`].

use std::collections::HashSet;

use rand::seq::SliceRandom;
use strata_core::config::PoolConfig;
use strata_core::rank::{ranks_from_u32, ranks_to_u32};
use strata_core::{Rank, RankSet, Status};
use strata_dispatch::DispatchError;
use strata_engine::Method;
use strata_engine::rpc::{PoolCreateReq, PoolCreateResp, PoolProperty};
use strata_state::{MemberState, PoolService, PoolServiceState, epoch_secs};
use tracing::{debug, error, info, warn};

use crate::error::{PoolError, PoolResult};
use crate::manager::PoolManager;
use crate::property;
use crate::types::{PoolCreateRequest, PoolCreateResponse, PropertyArg};

/// Minimum SCM bytes per engine target.
pub const SCM_MIN_BYTES_PER_TARGET: u64 = 16 << 20;
/// Minimum NVMe bytes per engine target, when NVMe is requested at all.
pub const NVME_MIN_BYTES_PER_TARGET: u64 = 1 << 30;

/// SCM/NVMe split applied to `total_bytes` when no ratios are given.
const DEFAULT_TIER_RATIOS: [f64; 2] = [0.06, 0.94];

/// Engine statuses worth retrying a create on.
const CREATE_TRANSIENT: &[Status] = &[Status::GroupVersionMismatch];

/// Cleanup owed after the create dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    None,
    /// The engines refused; only the catalog record has to go.
    RemoveRecord,
    /// The outcome is unknown; engines may hold partial state.
    DestroyAndRemove,
}

impl Compensation {
    pub fn after_create(record_written: bool, dispatch_failed: bool, status: Status) -> Self {
        match (record_written, dispatch_failed) {
            (false, _) => Compensation::None,
            (true, true) => Compensation::DestroyAndRemove,
            (true, false) if !status.is_success() => Compensation::RemoveRecord,
            (true, false) => Compensation::None,
        }
    }
}

impl PoolManager {
    /// Create a pool.
    ///
    /// Repeating a create for a Ready pool returns the existing allocation
    /// without dispatching anything.
    pub async fn create(&self, req: PoolCreateRequest) -> PoolResult<PoolCreateResponse> {
        let uuid = req.uuid;
        if uuid.is_nil() {
            return Err(PoolError::InvalidUuid);
        }
        let lock = self.sysdb.lock_pool(uuid).await?;

        if let Some(existing) = self.sysdb.find_pool_by_uuid(&uuid)? {
            return Ok(match existing.state {
                PoolServiceState::Ready => {
                    info!(pool = %uuid, "pool already exists, returning existing allocation");
                    PoolCreateResponse {
                        status: Status::Success,
                        svc_reps: existing.replicas,
                        tgt_ranks: existing.storage_ranks,
                        tier_bytes: existing.tier_bytes,
                    }
                }
                state => {
                    warn!(pool = %uuid, %state, "pool create collides with in-flight operation");
                    Status::TryAgain.into()
                }
            });
        }

        let label = req
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(PoolError::LabelRequired)?
            .to_string();
        if uuid::Uuid::parse_str(&label).is_ok() {
            return Err(PoolError::InvalidRequest(format!(
                "pool label {label:?} may not be a UUID"
            )));
        }
        if let Some(owner) = self.sysdb.find_pool_by_label(&label)? {
            return Err(PoolError::DuplicateLabel {
                label,
                owner: owner.uuid,
            });
        }

        let ranks = self.select_ranks(&req.ranks, req.num_ranks)?;
        let num_svc_reps = svc_replicas(req.num_svc_reps, ranks.len(), &self.config)?;
        let fault_domains = self.sysdb.fault_domain_tree(&ranks)?.to_compressed()?;
        let target_count = self
            .dispatcher
            .engines()
            .iter()
            .next()
            .map(|e| e.target_count())
            .unwrap_or(0);
        let tier_bytes = tier_bytes(&req, ranks.len(), target_count)?;
        let properties = initial_properties(&label, &req.properties)?;

        let mut record = PoolService::creating(uuid, Some(label.clone()), epoch_secs());
        record.storage_ranks = ranks.clone();
        record.tier_bytes = tier_bytes.clone();
        record.mem_ratio = req.mem_ratio;
        self.sysdb.add_pool_service(&lock, &record)?;
        debug!(pool = %uuid, %label, ranks = ranks.len(), num_svc_reps, "pool record written");

        let engine_req = PoolCreateReq {
            uuid,
            label,
            sys: self.system.clone(),
            ranks: ranks_to_u32(&ranks),
            num_svc_reps,
            tier_bytes,
            mem_ratio: req.mem_ratio,
            fault_domains,
            properties,
        };
        let outcome = self.dispatch_create(&engine_req).await;

        let status = outcome.as_ref().map_or(Status::Success, |r| r.status);
        let compensation = Compensation::after_create(true, outcome.is_err(), status);
        match (compensation, outcome) {
            (Compensation::DestroyAndRemove, Err(err)) => {
                error!(pool = %uuid, error = %err, "pool create dispatch failed, cleaning up");
                if let Err(e) = self.destroy_on_engines(&record, true, true).await {
                    warn!(pool = %uuid, error = %e, "cleanup destroy failed");
                }
                self.sysdb.remove_pool_service(&lock, uuid)?;
                // Nothing was sent; the caller may retry as is.
                if matches!(err, PoolError::Dispatch(DispatchError::NoReadyEngine)) {
                    return Ok(Status::TryAgain.into());
                }
                Err(err)
            }
            (Compensation::RemoveRecord, _) => {
                warn!(pool = %uuid, %status, "engines rejected pool create");
                self.sysdb.remove_pool_service(&lock, uuid)?;
                Ok(status.into())
            }
            (_, Err(err)) => Err(err),
            (_, Ok(resp)) => {
                if !resp.svc_reps.is_empty() {
                    record.replicas = ranks_from_u32(&resp.svc_reps);
                }
                if !resp.tgt_ranks.is_empty() {
                    record.storage_ranks = ranks_from_u32(&resp.tgt_ranks);
                }
                if !resp.tier_bytes.is_empty() {
                    record.tier_bytes = resp.tier_bytes;
                }
                record.state = PoolServiceState::Ready;
                record.updated_at = epoch_secs();
                self.sysdb.update_pool_service(&lock, &record)?;
                info!(pool = %uuid, replicas = ?record.replicas, "pool created");

                Ok(PoolCreateResponse {
                    status: Status::Success,
                    svc_reps: record.replicas,
                    tgt_ranks: record.storage_ranks,
                    tier_bytes: record.tier_bytes,
                })
            }
        }
    }

    async fn dispatch_create(&self, req: &PoolCreateReq) -> PoolResult<PoolCreateResp> {
        let engine = self
            .dispatcher
            .engines()
            .first_ready()
            .ok_or(DispatchError::NoReadyEngine)?;
        let dispatcher = &self.dispatcher;
        let engine = engine.as_ref();
        let resp = self
            .create_retry
            .retry_on("pool create", CREATE_TRANSIENT, move || {
                dispatcher.call_raw(engine, Method::PoolCreate, req)
            })
            .await?;
        Ok(resp)
    }

    /// Pick the pool's storage ranks.
    ///
    /// Explicit ranks must all be joined; offenders are reported together.
    /// Otherwise every joined rank is used, randomly down-sampled to
    /// `num_ranks` when that is non-zero.
    pub(crate) fn select_ranks(&self, requested: &[Rank], num_ranks: u32) -> PoolResult<Vec<Rank>> {
        let joined = self.sysdb.member_ranks(Some(MemberState::Joined))?;

        if !requested.is_empty() {
            let available: HashSet<Rank> = joined.into_iter().collect();
            let invalid: RankSet = requested
                .iter()
                .copied()
                .filter(|r| !available.contains(r))
                .collect();
            if !invalid.is_empty() {
                return Err(PoolError::InvalidRanks(invalid));
            }
            let mut ranks = requested.to_vec();
            ranks.sort_unstable();
            ranks.dedup();
            return Ok(ranks);
        }

        if joined.is_empty() {
            return Err(PoolError::NoRanks);
        }
        if num_ranks == 0 {
            return Ok(joined);
        }
        if num_ranks as usize > joined.len() {
            return Err(PoolError::NotEnoughRanks {
                requested: num_ranks,
                available: joined.len(),
            });
        }
        let mut ranks: Vec<Rank> = joined
            .choose_multiple(&mut rand::thread_rng(), num_ranks as usize)
            .copied()
            .collect();
        ranks.sort_unstable();
        Ok(ranks)
    }
}

/// Number of pool service replicas for a pool spanning `nranks` ranks.
///
/// An explicit request above the maximum is rejected. The default is
/// forced odd after clamping to the rank count.
pub(crate) fn svc_replicas(requested: u32, nranks: usize, cfg: &PoolConfig) -> PoolResult<u32> {
    let nranks = u32::try_from(nranks).unwrap_or(u32::MAX);
    if requested > cfg.max_svc_reps {
        return Err(PoolError::TooManySvcReps {
            requested,
            max: cfg.max_svc_reps,
        });
    }
    if requested > 0 {
        return Ok(requested.min(nranks).max(1));
    }

    let mut n = cfg.default_svc_reps.min(cfg.max_svc_reps).min(nranks).max(1);
    if n % 2 == 0 {
        n -= 1;
    }
    Ok(n)
}

/// Per-rank bytes for each tier, validated against per-target minimums.
pub(crate) fn tier_bytes(req: &PoolCreateRequest, nranks: usize, targets: u32) -> PoolResult<Vec<u64>> {
    if targets == 0 {
        return Err(PoolError::ZeroTargetCount);
    }
    if nranks == 0 {
        return Err(PoolError::NoRanks);
    }

    let tiers = if !req.tier_bytes.is_empty() {
        if req.total_bytes != 0 {
            return Err(PoolError::InvalidSize(
                "tier bytes and total size are mutually exclusive".to_string(),
            ));
        }
        req.tier_bytes.clone()
    } else if req.total_bytes > 0 {
        let ratios: &[f64] = if req.tier_ratios.is_empty() {
            &DEFAULT_TIER_RATIOS
        } else {
            &req.tier_ratios
        };
        if ratios.iter().any(|r| !(0.0..=1.0).contains(r)) || ratios.iter().sum::<f64>() > 1.0 + 1e-9 {
            return Err(PoolError::InvalidSize(format!(
                "tier ratios {ratios:?} must each be in 0..=1 and sum to at most 1"
            )));
        }
        ratios
            .iter()
            .map(|r| (req.total_bytes as f64 * r / nranks as f64) as u64)
            .collect()
    } else {
        return Err(PoolError::InvalidSize("no pool size given".to_string()));
    };

    let scm = tiers.first().copied().unwrap_or(0);
    let scm_min = SCM_MIN_BYTES_PER_TARGET * u64::from(targets);
    if scm < scm_min {
        return Err(PoolError::ScmTooSmall {
            bytes: scm,
            min: scm_min,
            targets,
        });
    }
    let nvme = tiers.get(1).copied().unwrap_or(0);
    let nvme_min = NVME_MIN_BYTES_PER_TARGET * u64::from(targets);
    if nvme != 0 && nvme < nvme_min {
        return Err(PoolError::NvmeTooSmall {
            bytes: nvme,
            min: nvme_min,
            targets,
        });
    }
    Ok(tiers)
}

/// Initial properties with the label first. An explicit `label`
/// property is ignored in favour of the request's label.
fn initial_properties(label: &str, args: &[PropertyArg]) -> PoolResult<Vec<PoolProperty>> {
    let mut props = vec![property::to_engine(&PropertyArg::text("label", label))?];
    for arg in args.iter().filter(|a| a.name != "label") {
        props.push(property::to_engine(arg)?);
    }
    Ok(props)
}
