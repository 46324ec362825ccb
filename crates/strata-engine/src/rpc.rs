//! Local RPC methods and their typed request/response messages.
//!
//! Every response carries an embedded `status`; zero is success. The
//! [`HasStatus`] trait exposes it so callers can turn non-zero values into
//! typed errors without knowing the concrete message.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::Status;
use uuid::Uuid;

/// Local RPC methods understood by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    SetRank,
    SetUp,
    ListSmdDevices,
    BioHealth,
    SmdPools,
    ReplaceStorage,
    SetFaultyState,
    LedManage,
    PoolCreate,
    PoolDestroy,
    PoolEvict,
    PoolExclude,
    PoolDrain,
    PoolReintegrate,
    PoolExtend,
    PoolQuery,
    PoolSetProp,
    PoolGetProp,
    PoolGetAcl,
    PoolOverwriteAcl,
    PoolUpdateAcl,
    PoolDeleteAcl,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Access to the status embedded in every response.
pub trait HasStatus {
    fn status(&self) -> Status;
}

macro_rules! impl_has_status {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HasStatus for $ty {
                fn status(&self) -> Status {
                    self.status
                }
            }
        )*
    };
}

impl_has_status!(
    StatusResp,
    ListSmdDevicesResp,
    BioHealthResp,
    SmdPoolsResp,
    DevManageResp,
    LedManageResp,
    PoolCreateResp,
    PoolEvictResp,
    PoolExtendResp,
    PoolQueryResp,
    PoolPropResp,
    PoolAclResp,
);

/// Response carrying nothing but a status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResp {
    #[serde(default)]
    pub status: Status,
}

// ── Join ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRankReq {
    pub rank: u32,
    pub map_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetUpReq {}

// ── SMD ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    #[default]
    Normal,
    New,
    Faulty,
    Unplugged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedState {
    #[default]
    NotApplicable,
    Off,
    On,
    QuickBlink,
    SlowBlink,
}

/// Device as reported in an engine's SMD inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmdDevice {
    pub uuid: Uuid,
    /// PCI transport address; empty when unknown.
    #[serde(default)]
    pub tr_addr: String,
    #[serde(default)]
    pub tgt_ids: Vec<i32>,
    #[serde(default)]
    pub state: DeviceState,
    #[serde(default)]
    pub led_state: LedState,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub avail_bytes: u64,
    /// Filled in by the query path when health was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<BioHealthResp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListSmdDevicesReq {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListSmdDevicesResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub devices: Vec<SmdDevice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioHealthReq {
    pub dev_uuid: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BioHealthResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub dev_uuid: Uuid,
    #[serde(default)]
    pub temperature: u32,
    #[serde(default)]
    pub media_errs: u64,
    #[serde(default)]
    pub read_errs: u32,
    #[serde(default)]
    pub write_errs: u32,
    #[serde(default)]
    pub unmap_errs: u32,
    #[serde(default)]
    pub checksum_errs: u32,
    #[serde(default)]
    pub power_on_hours: u64,
    #[serde(default)]
    pub unsafe_shutdowns: u64,
}

/// Pool blobs held by one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmdPool {
    pub uuid: Uuid,
    #[serde(default)]
    pub tgt_ids: Vec<i32>,
    #[serde(default)]
    pub blobs: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmdPoolsReq {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmdPoolsResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub pools: Vec<SmdPool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceStorageReq {
    pub old_dev_uuid: Uuid,
    pub new_dev_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetFaultyReq {
    pub uuid: Uuid,
}

/// Response to a single-device management call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevManageResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub device: Option<SmdDevice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedAction {
    Get,
    /// Blink to identify for `duration_mins`.
    Identify,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedManageReq {
    /// Transport addresses, one call per engine.
    pub tr_addrs: Vec<String>,
    pub action: LedAction,
    #[serde(default)]
    pub duration_mins: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedManageResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub devices: Vec<SmdDevice>,
}

// ── Pools ──────────────────────────────────────────────────────────

/// Property value as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Number(u64),
    Text(String),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Number(n) => write!(f, "{n}"),
            PropValue::Text(s) => f.write_str(s),
        }
    }
}

/// Numeric property id plus value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolProperty {
    pub number: u32,
    pub value: PropValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCreateReq {
    pub uuid: Uuid,
    pub label: String,
    pub sys: String,
    pub ranks: Vec<u32>,
    pub num_svc_reps: u32,
    pub tier_bytes: Vec<u64>,
    #[serde(default)]
    pub mem_ratio: Option<f32>,
    /// Compressed fault domain tree over `ranks`.
    pub fault_domains: Vec<u32>,
    #[serde(default)]
    pub properties: Vec<PoolProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolCreateResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub svc_reps: Vec<u32>,
    #[serde(default)]
    pub tgt_ranks: Vec<u32>,
    #[serde(default)]
    pub tier_bytes: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDestroyReq {
    pub uuid: Uuid,
    pub sys: String,
    /// Every rank that may hold pool resources.
    pub ranks: Vec<u32>,
    pub force: bool,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvictReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
    /// Handles to close; empty closes all.
    #[serde(default)]
    pub handles: Vec<Uuid>,
    /// Evict as the first phase of a destroy.
    #[serde(default)]
    pub destroy: bool,
    #[serde(default)]
    pub force_destroy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolEvictResp {
    #[serde(default)]
    pub status: Status,
    /// Number of handles closed.
    #[serde(default)]
    pub count: u32,
}

/// Exclude, drain and reintegrate share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRankTargetsReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
    pub rank: u32,
    /// Target indices on `rank`; empty means every target.
    #[serde(default)]
    pub target_idx: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolExtendReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
    /// Ranks being added.
    pub ranks: Vec<u32>,
    pub tier_bytes: Vec<u64>,
    pub fault_domains: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolExtendResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub tier_bytes: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolQueryReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub total: u64,
    pub free: u64,
    pub min: u64,
    pub max: u64,
    pub mean: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildState {
    #[default]
    Idle,
    Busy,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildStatus {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub state: RebuildState,
    #[serde(default)]
    pub objects: u64,
    #[serde(default)]
    pub records: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolQueryResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub uuid: Uuid,
    #[serde(default)]
    pub total_targets: u32,
    #[serde(default)]
    pub active_targets: u32,
    #[serde(default)]
    pub disabled_targets: u32,
    #[serde(default)]
    pub total_engines: u32,
    #[serde(default)]
    pub leader: u32,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub tier_stats: Vec<TierUsage>,
    #[serde(default)]
    pub rebuild: RebuildStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSetPropReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
    pub properties: Vec<PoolProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolGetPropReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
    /// Property numbers to fetch; empty fetches all.
    #[serde(default)]
    pub numbers: Vec<u32>,
}

/// Set-prop echoes what it applied; get-prop returns current values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolPropResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub properties: Vec<PoolProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolGetAclReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
}

/// Overwrite replaces the whole ACL; update merges by principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolModifyAclReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
    /// Entries in `type:flags:principal:perms` form.
    pub acl: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDeleteAclReq {
    pub uuid: Uuid,
    pub sys: String,
    pub svc_ranks: Vec<u32>,
    pub principal: String,
}

/// Every ACL call answers with the resulting ACL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolAclResp {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub acl: Vec<String>,
    #[serde(default)]
    pub owner_user: Option<String>,
    #[serde(default)]
    pub owner_group: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_displays_as_name() {
        assert_eq!(Method::ListSmdDevices.to_string(), "ListSmdDevices");
    }

    #[test]
    fn missing_status_defaults_to_success() {
        let resp: ListSmdDevicesResp = serde_json::from_str(r#"{"devices":[]}"#).unwrap();
        assert!(resp.status().is_success());
    }

    #[test]
    fn embedded_status_decodes() {
        let resp: StatusResp = serde_json::from_str(r#"{"status":-1012}"#).unwrap();
        assert_eq!(resp.status(), Status::Busy);
    }

    #[test]
    fn prop_values_are_untagged() {
        let props = vec![
            PoolProperty {
                number: 1,
                value: PropValue::Text("tank".into()),
            },
            PoolProperty {
                number: 2,
                value: PropValue::Number(5),
            },
        ];
        let json = serde_json::to_string(&props).unwrap();
        assert_eq!(
            json,
            r#"[{"number":1,"value":"tank"},{"number":2,"value":5}]"#
        );
        let back: Vec<PoolProperty> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, props);
    }
}
