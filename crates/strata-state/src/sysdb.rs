//! SystemDb: leader-gated view of the store used by the control plane.
//!
//! Adds three things on top of [`StateStore`]:
//!
//! - a leadership flag; every mutation is rejected with a leader hint when
//!   this instance is not the leader,
//! - per-pool exclusive locks handed out as RAII [`PoolLock`] guards,
//! - membership join with rank assignment and map version bumps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use strata_core::Rank;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::faultdomain::{FaultDomain, FaultDomainTree};
use crate::store::StateStore;
use crate::types::*;

type LockTable = Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Debug, Default)]
struct Leadership {
    is_leader: bool,
    hint: Option<String>,
}

/// Exclusive hold on one pool's catalog entry. Released on drop.
pub struct PoolLock {
    uuid: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl PoolLock {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl std::fmt::Debug for PoolLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLock").field("uuid", &self.uuid).finish()
    }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(&self.uuid)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            table.remove(&self.uuid);
        }
        debug!(pool = %self.uuid, "pool lock released");
    }
}

/// Result of a successful membership join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    pub member: Member,
    pub map_version: u64,
    /// True when a previously known engine rejoined with its old rank.
    pub rejoined: bool,
}

/// Leader-gated pool catalog and membership.
#[derive(Clone)]
pub struct SystemDb {
    store: StateStore,
    leadership: Arc<RwLock<Leadership>>,
    locks: LockTable,
    join_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SystemDb {
    /// Wrap a store. The new instance starts out as leader.
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            leadership: Arc::new(RwLock::new(Leadership {
                is_leader: true,
                hint: None,
            })),
            locks: Arc::new(Mutex::new(HashMap::new())),
            join_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Leadership ─────────────────────────────────────────────────

    pub fn is_leader(&self) -> bool {
        self.leadership
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_leader
    }

    /// Record a leadership change. `hint` names the current leader when
    /// this instance is not it.
    pub fn set_leader(&self, is_leader: bool, hint: Option<String>) {
        let mut l = self.leadership.write().unwrap_or_else(PoisonError::into_inner);
        if l.is_leader != is_leader {
            info!(is_leader, leader_hint = ?hint, "leadership changed");
        }
        l.is_leader = is_leader;
        l.hint = hint;
    }

    /// Fail with `NotLeader` unless this instance is the leader.
    pub fn check_leader(&self) -> StateResult<()> {
        let l = self.leadership.read().unwrap_or_else(PoisonError::into_inner);
        if l.is_leader {
            Ok(())
        } else {
            Err(StateError::NotLeader {
                leader_hint: l.hint.clone(),
            })
        }
    }

    // ── Pool locks ─────────────────────────────────────────────────

    /// Acquire the exclusive lock for a pool, waiting if it is held.
    pub async fn lock_pool(&self, uuid: Uuid) -> StateResult<PoolLock> {
        self.check_leader()?;
        let mutex = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(uuid).or_default())
        };
        let guard = mutex.lock_owned().await;
        debug!(pool = %uuid, "pool lock acquired");
        Ok(PoolLock {
            uuid,
            guard: Some(guard),
            table: Arc::clone(&self.locks),
        })
    }

    fn check_lock(&self, lock: &PoolLock, uuid: Uuid) -> StateResult<()> {
        self.check_leader()?;
        if lock.uuid != uuid {
            return Err(StateError::LockMismatch {
                held: lock.uuid,
                wanted: uuid,
            });
        }
        Ok(())
    }

    // ── Pool catalog ───────────────────────────────────────────────

    /// Durably record a new pool service.
    pub fn add_pool_service(&self, lock: &PoolLock, ps: &PoolService) -> StateResult<()> {
        self.check_lock(lock, ps.uuid)?;
        self.store.insert_pool(ps)
    }

    pub fn update_pool_service(&self, lock: &PoolLock, ps: &PoolService) -> StateResult<()> {
        self.check_lock(lock, ps.uuid)?;
        self.store.update_pool(ps)
    }

    /// Remove a pool record. Returns true if it existed.
    pub fn remove_pool_service(&self, lock: &PoolLock, uuid: Uuid) -> StateResult<bool> {
        self.check_lock(lock, uuid)?;
        self.store.delete_pool(&uuid)
    }

    pub fn find_pool_by_uuid(&self, uuid: &Uuid) -> StateResult<Option<PoolService>> {
        self.store.get_pool(uuid)
    }

    pub fn find_pool_by_label(&self, label: &str) -> StateResult<Option<PoolService>> {
        match self.store.pool_uuid_for_label(label)? {
            Some(uuid) => self.store.get_pool(&uuid),
            None => Ok(None),
        }
    }

    /// Ready pools, or every record when `all` is set.
    pub fn pool_service_list(&self, all: bool) -> StateResult<Vec<PoolService>> {
        let mut pools = self.store.list_pools()?;
        if !all {
            pools.retain(PoolService::is_ready);
        }
        Ok(pools)
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Admit an engine to the system.
    ///
    /// An engine already known by `uuid` keeps its rank; otherwise the
    /// next free rank is assigned. Fault domains must have the same depth
    /// as those already in the membership.
    pub async fn join(
        &self,
        uuid: Uuid,
        addr: &str,
        fault_domain: Option<&str>,
    ) -> StateResult<JoinResponse> {
        self.check_leader()?;
        let _serial = self.join_lock.lock().await;

        let domain: FaultDomain = match fault_domain {
            Some(fd) => fd.parse()?,
            None => default_fault_domain(addr)?,
        };
        let members = self.store.list_members()?;
        if let Some(other) = members.iter().find(|m| m.uuid != uuid) {
            let expected: FaultDomain = other.fault_domain.parse()?;
            if expected.num_levels() != domain.num_levels() {
                return Err(StateError::FaultDomain(format!(
                    "fault domain {domain} has {} levels, system expects {}",
                    domain.num_levels(),
                    expected.num_levels()
                )));
            }
        }

        let existing = members.iter().find(|m| m.uuid == uuid);
        let rejoined = existing.is_some();
        let rank = match existing {
            Some(m) => m.rank,
            None => members
                .iter()
                .map(|m| m.rank.0 + 1)
                .max()
                .map(Rank)
                .unwrap_or(Rank(0)),
        };

        let member = Member {
            rank,
            uuid,
            addr: addr.to_string(),
            state: MemberState::Joined,
            fault_domain: domain.to_string(),
            updated_at: epoch_secs(),
        };
        self.store.put_member(&member)?;
        let map_version = self.store.bump_map_version()?;

        info!(%rank, %uuid, addr, rejoined, map_version, "member joined");
        Ok(JoinResponse {
            member,
            map_version,
            rejoined,
        })
    }

    /// Change a member's state, bumping the map version on change.
    pub fn set_member_state(&self, rank: Rank, state: MemberState) -> StateResult<Member> {
        self.check_leader()?;
        let mut member = self
            .store
            .get_member(rank)?
            .ok_or_else(|| StateError::NotFound(format!("member rank {rank}")))?;
        if member.state != state {
            warn!(%rank, from = ?member.state, to = ?state, "member state changed");
            member.state = state;
            member.updated_at = epoch_secs();
            self.store.put_member(&member)?;
            self.store.bump_map_version()?;
        }
        Ok(member)
    }

    pub fn find_member_by_rank(&self, rank: Rank) -> StateResult<Option<Member>> {
        self.store.get_member(rank)
    }

    /// All members, rank-ascending.
    pub fn all_members(&self) -> StateResult<Vec<Member>> {
        self.store.list_members()
    }

    /// Ranks of members in `filter` state, or every rank when `None`.
    pub fn member_ranks(&self, filter: Option<MemberState>) -> StateResult<Vec<Rank>> {
        Ok(self
            .store
            .list_members()?
            .into_iter()
            .filter(|m| filter.is_none_or(|s| m.state == s))
            .map(|m| m.rank)
            .collect())
    }

    pub fn map_version(&self) -> StateResult<u64> {
        self.store.map_version()
    }

    /// Fault domain tree covering the given ranks.
    pub fn fault_domain_tree(&self, ranks: &[Rank]) -> StateResult<FaultDomainTree> {
        let mut tree = FaultDomainTree::new();
        for &rank in ranks {
            let member = self
                .store
                .get_member(rank)?
                .ok_or_else(|| StateError::NotFound(format!("member rank {rank}")))?;
            let domain: FaultDomain = member.fault_domain.parse()?;
            tree.add_rank(&domain, rank)?;
        }
        Ok(tree)
    }
}

/// Single-level domain named after the member's host.
fn default_fault_domain(addr: &str) -> StateResult<FaultDomain> {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    format!("/{host}").parse()
}

/// Get the current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
