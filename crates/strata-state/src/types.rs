//! Record types for the Strata system database.
//!
//! These types represent the persisted pool catalog and cluster
//! membership. All types are serializable to/from JSON for storage in
//! redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::Rank;
use uuid::Uuid;

// ── Pool services ─────────────────────────────────────────────────

/// Lifecycle state of a pool service record.
///
/// `Creating` and `Destroying` are intermediate states that survive a
/// leadership change; the leader's sweep drives them to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolServiceState {
    Creating,
    Ready,
    Destroying,
}

impl fmt::Display for PoolServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolServiceState::Creating => "Creating",
            PoolServiceState::Ready => "Ready",
            PoolServiceState::Destroying => "Destroying",
        };
        f.write_str(s)
    }
}

/// Catalog record for a pool and its metadata service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolService {
    pub uuid: Uuid,
    /// Unique label; `None` only for records written without one.
    pub label: Option<String>,
    pub state: PoolServiceState,
    /// Pool service replica ranks, in the order the engine reported them.
    pub replicas: Vec<Rank>,
    /// Ranks the pool's storage spans, ascending.
    pub storage_ranks: Vec<Rank>,
    /// Per-rank bytes for each storage tier (SCM first, then NVMe).
    pub tier_bytes: Vec<u64>,
    /// Memory-file ratio for metadata-on-SSD pools.
    pub mem_ratio: Option<f32>,
    /// Unix timestamp (seconds) when this record was first written.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last state change.
    pub updated_at: u64,
}

impl PoolService {
    /// A fresh record in the `Creating` state.
    pub fn creating(uuid: Uuid, label: Option<String>, now: u64) -> Self {
        Self {
            uuid,
            label,
            state: PoolServiceState::Creating,
            replicas: Vec::new(),
            storage_ranks: Vec::new(),
            tier_bytes: Vec::new(),
            mem_ratio: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the key for the pools table.
    pub fn table_key(&self) -> String {
        pool_key(&self.uuid)
    }

    pub fn is_ready(&self) -> bool {
        self.state == PoolServiceState::Ready
    }
}

/// Build the pools table key for a UUID.
pub fn pool_key(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string()
}

// ── Members ───────────────────────────────────────────────────────

/// Membership state of an engine rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    AwaitFormat,
    Joined,
    Stopped,
    Excluded,
    Errored,
}

impl MemberState {
    /// Whether a rank in this state can host new pool storage.
    pub fn is_available(self) -> bool {
        self == MemberState::Joined
    }
}

/// A rank in the cluster membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub rank: Rank,
    pub uuid: Uuid,
    /// Control address of the host running the engine.
    pub addr: String,
    pub state: MemberState,
    /// Fault domain path, e.g. `/rack0/host3`.
    pub fault_domain: String,
    /// Unix timestamp of the last state change.
    pub updated_at: u64,
}

impl Member {
    /// Build the key for the members table.
    pub fn table_key(&self) -> String {
        member_key(self.rank)
    }
}

/// Build the members table key for a rank.
pub fn member_key(rank: Rank) -> String {
    format!("{:010}", rank.0)
}
