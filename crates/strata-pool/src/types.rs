//! Request and response types for the administrative pool operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strata_core::{Rank, Status};
use strata_engine::rpc::{PropValue, RebuildStatus, TierUsage};
use uuid::Uuid;

use crate::error::PoolError;

/// A pool named by UUID or by label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PoolId {
    Uuid(Uuid),
    Label(String),
}

impl FromStr for PoolId {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PoolError::InvalidId(s.to_string()));
        }
        Ok(match Uuid::parse_str(s) {
            Ok(uuid) => PoolId::Uuid(uuid),
            Err(_) => PoolId::Label(s.to_string()),
        })
    }
}

impl TryFrom<String> for PoolId {
    type Error = PoolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PoolId> for String {
    fn from(id: PoolId) -> Self {
        id.to_string()
    }
}

impl From<Uuid> for PoolId {
    fn from(uuid: Uuid) -> Self {
        PoolId::Uuid(uuid)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolId::Uuid(u) => write!(f, "{u}"),
            PoolId::Label(l) => f.write_str(l),
        }
    }
}

/// Named pool property as the administrator sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyArg {
    pub name: String,
    pub value: PropValue,
}

impl PropertyArg {
    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: PropValue::Text(value.to_string()),
        }
    }

    pub fn number(name: &str, value: u64) -> Self {
        Self {
            name: name.to_string(),
            value: PropValue::Number(value),
        }
    }
}

/// Response carrying only an engine status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

impl From<Status> for StatusResponse {
    fn from(status: Status) -> Self {
        Self { status }
    }
}

// ── Create ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolCreateRequest {
    pub uuid: Uuid,
    #[serde(default)]
    pub label: Option<String>,
    /// Explicit per-rank bytes per tier (SCM, NVMe). Exclusive with
    /// `total_bytes`.
    #[serde(default)]
    pub tier_bytes: Vec<u64>,
    /// Total pool size, split across tiers by `tier_ratios`.
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub tier_ratios: Vec<f64>,
    /// Explicit ranks. When empty, joined ranks are used.
    #[serde(default)]
    pub ranks: Vec<Rank>,
    /// Down-sample joined ranks to this many. Zero means all.
    #[serde(default)]
    pub num_ranks: u32,
    /// Zero selects the configured default.
    #[serde(default)]
    pub num_svc_reps: u32,
    #[serde(default)]
    pub mem_ratio: Option<f32>,
    #[serde(default)]
    pub properties: Vec<PropertyArg>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolCreateResponse {
    pub status: Status,
    pub svc_reps: Vec<Rank>,
    pub tgt_ranks: Vec<Rank>,
    pub tier_bytes: Vec<u64>,
}

impl From<Status> for PoolCreateResponse {
    fn from(status: Status) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

// ── Destroy / evict ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDestroyRequest {
    pub id: PoolId,
    /// Destroy even with open handles.
    #[serde(default)]
    pub force: bool,
    /// Destroy even if the pool still holds containers.
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvictRequest {
    pub id: PoolId,
    /// Handles to evict; empty evicts every handle.
    #[serde(default)]
    pub handles: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolEvictResponse {
    pub status: Status,
    pub count: u32,
}

// ── Targets ───────────────────────────────────────────────────────

/// Exclude, drain or reintegrate targets on one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRankTargetsRequest {
    pub id: PoolId,
    pub rank: Rank,
    /// Target indices on the rank; empty means all of them.
    #[serde(default)]
    pub target_idx: Vec<u32>,
}

// ── Extend ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolExtendRequest {
    pub id: PoolId,
    pub ranks: Vec<Rank>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolExtendResponse {
    pub status: Status,
    pub tier_bytes: Vec<u64>,
}

// ── Query ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolQueryResponse {
    pub status: Status,
    pub uuid: Uuid,
    pub label: Option<String>,
    pub svc_reps: Vec<Rank>,
    pub total_targets: u32,
    pub active_targets: u32,
    pub disabled_targets: u32,
    pub total_engines: u32,
    pub leader: Option<Rank>,
    pub version: u32,
    pub tier_stats: Vec<TierUsage>,
    pub rebuild: RebuildStatus,
}

// ── Properties ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSetPropRequest {
    pub id: PoolId,
    pub properties: Vec<PropertyArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolGetPropRequest {
    pub id: PoolId,
    /// Property names; empty fetches every property.
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolPropResponse {
    pub status: Status,
    pub properties: Vec<PropertyArg>,
}

// ── Access control ───────────────────────────────────────────────

/// Overwrite or update a pool ACL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolModifyAclRequest {
    pub id: PoolId,
    /// Entries in `type:flags:principal:perms` form, e.g. `A::OWNER@:rw`.
    #[serde(default)]
    pub acl: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDeleteAclRequest {
    pub id: PoolId,
    /// Principal whose entry is removed, e.g. `u:user@` or `OWNER@`.
    pub principal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolAclResponse {
    pub status: Status,
    pub acl: Vec<String>,
    pub owner_user: Option<String>,
    pub owner_group: Option<String>,
}

impl From<Status> for PoolAclResponse {
    fn from(status: Status) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}
