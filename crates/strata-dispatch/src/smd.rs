//! SMD inventory queries and device management fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strata_core::{Rank, Status};
use strata_engine::rpc::{
    BioHealthReq, BioHealthResp, DevManageResp, LedAction, LedManageReq, LedManageResp,
    ListSmdDevicesReq, ListSmdDevicesResp, ReplaceStorageReq, SetFaultyReq, SmdDevice, SmdPool,
    SmdPoolsReq, SmdPoolsResp,
};
use strata_engine::{Engine, EngineError, EngineResult, Method};
use tracing::{info, warn};
use uuid::Uuid;

use crate::device::DeviceId;
use crate::error::{DispatchError, DispatchResult};
use crate::fanout::{Dispatcher, RankResult, Targets, Unready};
use crate::resolver::{EngineDevices, resolve};
use crate::retry::RetryPolicy;

/// Inventory query. A `uuid` filter could name a device or a pool, so it
/// must be paired with omitting one of the two.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmdQueryReq {
    #[serde(default)]
    pub rank: Option<Rank>,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub omit_devices: bool,
    #[serde(default)]
    pub omit_pools: bool,
    #[serde(default)]
    pub include_health: bool,
}

/// One rank's SMD inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankSmdInfo {
    pub rank: Rank,
    pub devices: Vec<SmdDevice>,
    pub pools: Vec<SmdPool>,
}

/// Device management request, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SmdManageOp {
    /// Replace the device named by `old` (a uuid) with `new_uuid`.
    Replace { old: String, new_uuid: Uuid },
    /// Mark each device faulty.
    SetFaulty { ids: String },
    /// Manage LEDs; every device must resolve to a transport address.
    Led {
        ids: String,
        action: LedAction,
        #[serde(default)]
        duration_mins: u32,
    },
}

/// Outcome for one device. Failures keep the device identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceResult {
    pub status: Status,
    pub device: SmdDevice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankManageResult {
    pub rank: Rank,
    pub results: Vec<DeviceResult>,
}

/// Map a failed call onto the status reported for the device.
fn status_for(err: &EngineError) -> Status {
    match err {
        EngineError::Status { status, .. } => *status,
        EngineError::Timeout { .. } => Status::TimedOut,
        EngineError::NotReady { .. } | EngineError::Transport { .. } => Status::Unreachable,
        EngineError::Encode { .. } | EngineError::Decode { .. } | EngineError::RankAlreadySet { .. } => {
            Status::Invalid
        }
    }
}

/// Fill in whichever identity the engine left out.
fn backfill(mut device: SmdDevice, id: &DeviceId) -> SmdDevice {
    match id {
        DeviceId::Uuid(u) if device.uuid.is_nil() => device.uuid = *u,
        DeviceId::Addr(a) if device.tr_addr.is_empty() => device.tr_addr = a.to_string(),
        _ => {}
    }
    device
}

fn device_result(id: &DeviceId, outcome: EngineResult<DevManageResp>) -> DeviceResult {
    match outcome {
        Ok(resp) => DeviceResult {
            status: resp.status,
            device: backfill(resp.device.unwrap_or_default(), id),
            error: None,
        },
        Err(e) => DeviceResult {
            status: status_for(&e),
            device: backfill(SmdDevice::default(), id),
            error: Some(e.to_string()),
        },
    }
}

/// SMD query and management over the local engines.
#[derive(Clone, Debug)]
pub struct SmdService {
    dispatcher: Dispatcher,
    replace_retry: RetryPolicy,
}

impl SmdService {
    pub fn new(dispatcher: Dispatcher, replace_retry: RetryPolicy) -> Self {
        Self {
            dispatcher,
            replace_retry,
        }
    }

    fn engine(&self, index: u32) -> DispatchResult<&Arc<dyn Engine>> {
        self.dispatcher
            .engines()
            .get(index)
            .ok_or(DispatchError::NoReadyEngine)
    }

    /// Per-rank SMD inventory, rank-ascending. Unreachable engines are
    /// left out.
    pub async fn query(&self, req: &SmdQueryReq) -> DispatchResult<Vec<RankSmdInfo>> {
        if req.uuid.is_some() && !req.omit_devices && !req.omit_pools {
            return Err(DispatchError::InvalidRequest(
                "a uuid filter requires omitting either devices or pools".to_string(),
            ));
        }
        let targets = Targets::from_rank(req.rank);
        let wanted = |u: &Uuid| req.uuid.is_none_or(|want| want == *u);
        let mut by_rank: BTreeMap<Rank, RankSmdInfo> = BTreeMap::new();

        if !req.omit_devices {
            let results = self
                .dispatcher
                .fan_out::<_, ListSmdDevicesResp>(
                    &targets,
                    Method::ListSmdDevices,
                    &ListSmdDevicesReq {},
                    Unready::Skip,
                )
                .await;
            for (rank, index, resp) in read_outcomes(results)? {
                let mut devices: Vec<SmdDevice> =
                    resp.devices.into_iter().filter(|d| wanted(&d.uuid)).collect();
                if req.include_health {
                    self.attach_health(index, &mut devices).await?;
                }
                rank_info(&mut by_rank, rank).devices = devices;
            }
        }

        if !req.omit_pools {
            let results = self
                .dispatcher
                .fan_out::<_, SmdPoolsResp>(&targets, Method::SmdPools, &SmdPoolsReq {}, Unready::Skip)
                .await;
            for (rank, _, resp) in read_outcomes(results)? {
                rank_info(&mut by_rank, rank).pools =
                    resp.pools.into_iter().filter(|p| wanted(&p.uuid)).collect();
            }
        }

        let mut infos: Vec<RankSmdInfo> = by_rank.into_values().collect();
        if req.uuid.is_some() {
            infos.retain(|i| !i.devices.is_empty() || !i.pools.is_empty());
        }
        Ok(infos)
    }

    async fn attach_health(&self, index: u32, devices: &mut [SmdDevice]) -> DispatchResult<()> {
        let engine = self.engine(index)?;
        for dev in devices.iter_mut() {
            let req = BioHealthReq { dev_uuid: dev.uuid };
            match self
                .dispatcher
                .call::<_, BioHealthResp>(engine.as_ref(), Method::BioHealth, &req)
                .await
            {
                Ok(health) => dev.health = Some(health),
                Err(e) => warn!(device = %dev.uuid, error = %e, "health query failed"),
            }
        }
        Ok(())
    }

    /// Run a device management operation. Each device's outcome is
    /// recorded even when others on the same engine fail.
    pub async fn manage(&self, op: &SmdManageOp) -> DispatchResult<Vec<RankManageResult>> {
        let mut results = match op {
            SmdManageOp::Replace { old, new_uuid } => self.replace(old, *new_uuid).await?,
            SmdManageOp::SetFaulty { ids } => self.set_faulty(ids).await?,
            SmdManageOp::Led {
                ids,
                action,
                duration_mins,
            } => self.led(ids, *action, *duration_mins).await?,
        };
        results.sort_by_key(|r| r.rank);
        Ok(results)
    }

    async fn replace(&self, old: &str, new_uuid: Uuid) -> DispatchResult<Vec<RankManageResult>> {
        let resolved = resolve(&self.dispatcher, old, false).await?;
        let (owner, id) = match resolved.as_slice() {
            [owner] if owner.ids.len() == 1 => (owner, &owner.ids[0]),
            _ => {
                return Err(DispatchError::InvalidRequest(
                    "replace takes exactly one device".to_string(),
                ));
            }
        };
        let old_uuid = id.as_uuid().ok_or_else(|| {
            DispatchError::InvalidRequest("replace requires a device uuid".to_string())
        })?;

        let engine = self.engine(owner.index)?;
        let req = ReplaceStorageReq {
            old_dev_uuid: old_uuid,
            new_dev_uuid: new_uuid,
        };
        let dispatcher = &self.dispatcher;
        let engine = engine.as_ref();
        let req = &req;
        let outcome = self
            .replace_retry
            .retry_busy("replace storage", move || {
                dispatcher.call_raw::<_, DevManageResp>(engine, Method::ReplaceStorage, req)
            })
            .await;
        let result = device_result(id, outcome);
        info!(rank = %owner.rank, old = %old_uuid, new = %new_uuid, status = %result.status, "device replace");

        Ok(vec![RankManageResult {
            rank: owner.rank,
            results: vec![result],
        }])
    }

    async fn set_faulty(&self, ids: &str) -> DispatchResult<Vec<RankManageResult>> {
        let resolved = resolve(&self.dispatcher, ids, false).await?;
        let mut work = Vec::new();
        for owner in &resolved {
            let uuids = owner
                .ids
                .iter()
                .map(|id| {
                    id.as_uuid().ok_or_else(|| {
                        DispatchError::InvalidRequest(format!("set-faulty requires a device uuid, got {id}"))
                    })
                })
                .collect::<DispatchResult<Vec<Uuid>>>()?;
            work.push((owner, self.engine(owner.index)?, uuids));
        }

        let per_engine = work.into_iter().map(|(owner, engine, uuids)| async move {
            let mut results = Vec::with_capacity(uuids.len());
            for uuid in uuids {
                let outcome = self
                    .dispatcher
                    .call_raw::<_, DevManageResp>(
                        engine.as_ref(),
                        Method::SetFaultyState,
                        &SetFaultyReq { uuid },
                    )
                    .await;
                results.push(device_result(&DeviceId::Uuid(uuid), outcome));
            }
            RankManageResult {
                rank: owner.rank,
                results,
            }
        });
        Ok(join_all(per_engine).await)
    }

    async fn led(
        &self,
        ids: &str,
        action: LedAction,
        duration_mins: u32,
    ) -> DispatchResult<Vec<RankManageResult>> {
        let resolved = resolve(&self.dispatcher, ids, true).await?;
        let mut work: Vec<(&EngineDevices, &Arc<dyn Engine>, Vec<String>)> = Vec::new();
        for owner in &resolved {
            let addrs = owner
                .ids
                .iter()
                .map(|id| match id {
                    DeviceId::Addr(a) => Ok(a.to_string()),
                    DeviceId::Uuid(u) => Err(DispatchError::NoTransportAddress(*u)),
                })
                .collect::<DispatchResult<Vec<String>>>()?;
            work.push((owner, self.engine(owner.index)?, addrs));
        }

        let per_engine = work.into_iter().map(|(owner, engine, tr_addrs)| async move {
            let req = LedManageReq {
                tr_addrs: tr_addrs.clone(),
                action,
                duration_mins,
            };
            let outcome = self
                .dispatcher
                .call_raw::<_, LedManageResp>(engine.as_ref(), Method::LedManage, &req)
                .await;

            let results = match outcome {
                Ok(resp) if !resp.devices.is_empty() => resp
                    .devices
                    .into_iter()
                    .map(|device| DeviceResult {
                        status: resp.status,
                        device,
                        error: None,
                    })
                    .collect(),
                Ok(resp) => owner
                    .ids
                    .iter()
                    .map(|id| DeviceResult {
                        status: resp.status,
                        device: backfill(SmdDevice::default(), id),
                        error: None,
                    })
                    .collect(),
                Err(e) => owner
                    .ids
                    .iter()
                    .map(|id| DeviceResult {
                        status: status_for(&e),
                        device: backfill(SmdDevice::default(), id),
                        error: Some(e.to_string()),
                    })
                    .collect(),
            };
            RankManageResult {
                rank: owner.rank,
                results,
            }
        });
        Ok(join_all(per_engine).await)
    }
}

fn rank_info(by_rank: &mut BTreeMap<Rank, RankSmdInfo>, rank: Rank) -> &mut RankSmdInfo {
    by_rank.entry(rank).or_insert_with(|| RankSmdInfo {
        rank,
        devices: Vec::new(),
        pools: Vec::new(),
    })
}

/// Successful read-path outcomes. Transport failures are skipped; an
/// engine that answered with an error status fails the query.
fn read_outcomes<T>(results: Vec<RankResult<T>>) -> DispatchResult<Vec<(Rank, u32, T)>> {
    let mut out = Vec::with_capacity(results.len());
    for r in results {
        match r.outcome {
            Ok(resp) => out.push((r.rank, r.index, resp)),
            Err(e) if e.is_transport() => {
                warn!(rank = %r.rank, error = %e, "rank unavailable for query");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::config::RetryConfig;
    use strata_engine::rpc::DeviceState;
    use strata_engine::{EngineSet, MockEngine};

    const ADDR_0: &str = "5d0505:01:00.0";
    const ADDR_1: &str = "5d0505:03:00.0";

    fn dev(n: u128, addr: &str) -> SmdDevice {
        SmdDevice {
            uuid: Uuid::from_u128(n),
            tr_addr: addr.to_string(),
            tgt_ids: vec![0, 1],
            total_bytes: 1 << 40,
            ..Default::default()
        }
    }

    /// Two engines, each reporting one device and one pool.
    fn two_engines() -> (SmdService, Vec<Arc<MockEngine>>) {
        let mocks: Vec<Arc<MockEngine>> = [(0u32, 1u128, ADDR_0), (1, 2, ADDR_1)]
            .into_iter()
            .map(|(i, n, addr)| {
                let m = MockEngine::new(i).with_rank(Rank(i));
                m.set_default(
                    Method::ListSmdDevices,
                    &ListSmdDevicesResp {
                        devices: vec![dev(n, addr)],
                        ..Default::default()
                    },
                );
                m.set_default(
                    Method::SmdPools,
                    &SmdPoolsResp {
                        pools: vec![SmdPool {
                            uuid: Uuid::from_u128(100 + n),
                            tgt_ids: vec![0],
                            blobs: vec![7],
                        }],
                        ..Default::default()
                    },
                );
                Arc::new(m)
            })
            .collect();
        // Register in reverse to show output order does not depend on it.
        let set: EngineSet = mocks
            .iter()
            .rev()
            .map(|m| Arc::clone(m) as Arc<dyn Engine>)
            .collect();
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            growth_factor: 2.0,
            max_delay_ms: 2,
        });
        (SmdService::new(Dispatcher::new(set), policy), mocks)
    }

    #[tokio::test]
    async fn query_two_engines_rank_ascending() {
        let (svc, _) = two_engines();
        let req = SmdQueryReq {
            rank: Some(Rank::NIL),
            omit_pools: true,
            ..Default::default()
        };

        let infos = svc.query(&req).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].rank, Rank(0));
        assert_eq!(infos[0].devices, vec![dev(1, ADDR_0)]);
        assert_eq!(infos[1].rank, Rank(1));
        assert_eq!(infos[1].devices, vec![dev(2, ADDR_1)]);
        assert!(infos.iter().all(|i| i.pools.is_empty()));
    }

    #[tokio::test]
    async fn query_uuid_filter_requires_omission() {
        let (svc, mocks) = two_engines();
        let req = SmdQueryReq {
            uuid: Some(Uuid::from_u128(1)),
            ..Default::default()
        };
        assert!(matches!(
            svc.query(&req).await,
            Err(DispatchError::InvalidRequest(_))
        ));
        assert_eq!(mocks[0].call_count(), 0);
    }

    #[tokio::test]
    async fn query_uuid_filter_on_pools() {
        let (svc, _) = two_engines();
        let req = SmdQueryReq {
            uuid: Some(Uuid::from_u128(102)),
            omit_devices: true,
            ..Default::default()
        };
        let infos = svc.query(&req).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].rank, Rank(1));
        assert_eq!(infos[0].pools[0].uuid, Uuid::from_u128(102));
    }

    #[tokio::test]
    async fn query_with_health() {
        let (svc, mocks) = two_engines();
        mocks[0].set_default(
            Method::BioHealth,
            &BioHealthResp {
                temperature: 310,
                ..Default::default()
            },
        );
        let req = SmdQueryReq {
            rank: Some(Rank(0)),
            omit_pools: true,
            include_health: true,
            ..Default::default()
        };
        let infos = svc.query(&req).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].devices[0].health.as_ref().unwrap().temperature, 310);
    }

    #[tokio::test]
    async fn replace_retries_busy() {
        let (svc, mocks) = two_engines();
        mocks[1].push_response(
            Method::ReplaceStorage,
            &DevManageResp {
                status: Status::Busy,
                device: None,
            },
        );
        mocks[1].push_response(
            Method::ReplaceStorage,
            &DevManageResp {
                status: Status::Success,
                device: Some(SmdDevice {
                    uuid: Uuid::from_u128(9),
                    state: DeviceState::Normal,
                    ..Default::default()
                }),
            },
        );

        let results = svc
            .manage(&SmdManageOp::Replace {
                old: Uuid::from_u128(2).to_string(),
                new_uuid: Uuid::from_u128(9),
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rank, Rank(1));
        assert!(results[0].results[0].status.is_success());
        assert_eq!(mocks[1].calls_for(Method::ReplaceStorage).len(), 2);
    }

    #[tokio::test]
    async fn replace_rejects_address() {
        let (svc, _) = two_engines();
        let err = svc
            .manage(&SmdManageOp::Replace {
                old: ADDR_0.to_string(),
                new_uuid: Uuid::from_u128(9),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn set_faulty_records_failure_with_identity() {
        let (svc, mocks) = two_engines();
        mocks[0].push_response(
            Method::SetFaultyState,
            &DevManageResp {
                status: Status::Invalid,
                device: None,
            },
        );
        mocks[1].push_transport_error(Method::SetFaultyState, "connection reset");

        let ids = format!("{},{}", Uuid::from_u128(2), Uuid::from_u128(1));
        let results = svc.manage(&SmdManageOp::SetFaulty { ids }).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, Rank(0));
        assert_eq!(results[0].results[0].status, Status::Invalid);
        assert_eq!(results[0].results[0].device.uuid, Uuid::from_u128(1));
        assert_eq!(results[1].results[0].status, Status::Unreachable);
        assert_eq!(results[1].results[0].device.uuid, Uuid::from_u128(2));
        assert!(results[1].results[0].error.is_some());
    }

    #[tokio::test]
    async fn led_batches_addresses_per_engine() {
        let (svc, mocks) = two_engines();
        mocks[0].set_default(Method::LedManage, &LedManageResp::default());

        let ids = format!("{},{}", Uuid::from_u128(1), ADDR_0);
        let results = svc
            .manage(&SmdManageOp::Led {
                ids,
                action: LedAction::Identify,
                duration_mins: 2,
            })
            .await
            .unwrap();

        let calls = mocks[0].calls_for(Method::LedManage);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["tr_addrs"], serde_json::json!([ADDR_0]));
        assert_eq!(results[0].results.len(), 1);
        assert_eq!(results[0].results[0].device.tr_addr, ADDR_0);
    }

    #[tokio::test]
    async fn led_requires_transport_address() {
        let (svc, mocks) = two_engines();
        mocks[1].set_default(
            Method::ListSmdDevices,
            &ListSmdDevicesResp {
                devices: vec![dev(2, "")],
                ..Default::default()
            },
        );

        let err = svc
            .manage(&SmdManageOp::Led {
                ids: Uuid::from_u128(2).to_string(),
                action: LedAction::Get,
                duration_mins: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoTransportAddress(u) if u == Uuid::from_u128(2)));
        assert!(mocks[1].calls_for(Method::LedManage).is_empty());
    }

    #[test]
    fn manage_op_is_tagged() {
        let op: SmdManageOp =
            serde_json::from_str(r#"{"op":"set_faulty","ids":"abc"}"#).unwrap();
        assert_eq!(op, SmdManageOp::SetFaulty { ids: "abc".into() });
    }
}
