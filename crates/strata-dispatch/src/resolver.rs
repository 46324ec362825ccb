//! Device identifier resolution.
//!
//! Maps an administrator's comma-separated identifier list onto the
//! engines that own those devices, using a rank-unfiltered SMD inventory
//! fan-out. Every identifier must be matched somewhere or the whole
//! resolution fails.

use std::collections::HashSet;

use strata_core::Rank;
use strata_engine::Method;
use strata_engine::rpc::{ListSmdDevicesReq, ListSmdDevicesResp};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::device::{DeviceId, PciAddress, parse_id_list};
use crate::error::{DispatchError, DispatchResult};
use crate::fanout::{Dispatcher, Targets, Unready};

/// Devices owned by one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDevices {
    pub rank: Rank,
    pub index: u32,
    pub ids: Vec<DeviceId>,
}

impl EngineDevices {
    fn record(&mut self, id: DeviceId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }
}

/// Resolve `ids` to owning engines, rank-ascending.
///
/// With `prefer_addr`, a device known by both UUID and address is recorded
/// once, by address.
pub async fn resolve(
    dispatcher: &Dispatcher,
    ids: &str,
    prefer_addr: bool,
) -> DispatchResult<Vec<EngineDevices>> {
    let wanted = parse_id_list(ids)?;
    let pending_uuids: HashSet<Uuid> = wanted.iter().filter_map(DeviceId::as_uuid).collect();
    let pending_addrs: HashSet<PciAddress> =
        wanted.iter().filter_map(|id| id.as_addr().cloned()).collect();

    let results = dispatcher
        .fan_out::<_, ListSmdDevicesResp>(
            &Targets::All,
            Method::ListSmdDevices,
            &ListSmdDevicesReq {},
            Unready::Skip,
        )
        .await;

    let mut found: HashSet<DeviceId> = HashSet::new();
    let mut resolved = Vec::new();
    for result in results {
        let resp = match result.outcome {
            Ok(resp) => resp,
            Err(e) => {
                warn!(rank = %result.rank, error = %e, "skipping engine inventory");
                continue;
            }
        };

        let mut owned = EngineDevices {
            rank: result.rank,
            index: result.index,
            ids: Vec::new(),
        };
        for dev in &resp.devices {
            let addr: Option<PciAddress> = dev.tr_addr.parse().ok();

            if let Some(addr) = addr.as_ref().filter(|a| pending_addrs.contains(*a)) {
                owned.record(DeviceId::Addr(addr.clone()));
                found.insert(DeviceId::Addr(addr.clone()));
                if prefer_addr && pending_uuids.contains(&dev.uuid) {
                    found.insert(DeviceId::Uuid(dev.uuid));
                }
            }

            if pending_uuids.contains(&dev.uuid) {
                match addr.filter(|_| prefer_addr) {
                    Some(addr) => owned.record(DeviceId::Addr(addr)),
                    None => owned.record(DeviceId::Uuid(dev.uuid)),
                }
                found.insert(DeviceId::Uuid(dev.uuid));
            }
        }

        if !owned.ids.is_empty() {
            debug!(rank = %owned.rank, ids = owned.ids.len(), "devices resolved");
            resolved.push(owned);
        }
    }

    let missing: Vec<String> = wanted
        .iter()
        .filter(|id| !found.contains(*id))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(DispatchError::DevicesNotFound(missing));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use strata_engine::rpc::SmdDevice;
    use strata_engine::{Engine, EngineSet, MockEngine};

    const ADDR_A: &str = "5d0505:01:00.0";
    const ADDR_B: &str = "5d0505:03:00.0";

    fn dev(n: u128, addr: &str) -> SmdDevice {
        SmdDevice {
            uuid: Uuid::from_u128(n),
            tr_addr: addr.to_string(),
            ..Default::default()
        }
    }

    /// Two engines: rank 0 owns devices 1 and 2 (sharing ADDR_A), rank 1
    /// owns device 3 at ADDR_B and device 4 with no address.
    fn dispatcher() -> Dispatcher {
        let e0 = MockEngine::new(0).with_rank(Rank(0));
        e0.set_default(
            Method::ListSmdDevices,
            &ListSmdDevicesResp {
                devices: vec![dev(1, ADDR_A), dev(2, ADDR_A)],
                ..Default::default()
            },
        );
        let e1 = MockEngine::new(1).with_rank(Rank(1));
        e1.set_default(
            Method::ListSmdDevices,
            &ListSmdDevicesResp {
                devices: vec![dev(3, ADDR_B), dev(4, "")],
                ..Default::default()
            },
        );
        let set: EngineSet = [Arc::new(e1) as Arc<dyn Engine>, Arc::new(e0)]
            .into_iter()
            .collect();
        Dispatcher::new(set)
    }

    fn addr(s: &str) -> DeviceId {
        DeviceId::Addr(s.parse().unwrap())
    }

    #[tokio::test]
    async fn uuids_resolve_to_owning_engines() {
        let ids = format!("{},{}", Uuid::from_u128(3), Uuid::from_u128(1));
        let got = resolve(&dispatcher(), &ids, false).await.unwrap();

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].rank, Rank(0));
        assert_eq!(got[0].ids, vec![DeviceId::Uuid(Uuid::from_u128(1))]);
        assert_eq!(got[1].rank, Rank(1));
        assert_eq!(got[1].ids, vec![DeviceId::Uuid(Uuid::from_u128(3))]);
    }

    #[tokio::test]
    async fn unknown_identifier_fails_naming_it() {
        let known = Uuid::from_u128(1);
        let unknown = Uuid::from_u128(99);
        let err = resolve(&dispatcher(), &format!("{known},{unknown}"), false)
            .await
            .unwrap_err();
        match err {
            DispatchError::DevicesNotFound(missing) => {
                assert_eq!(missing, vec![unknown.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn address_preferred_over_uuid() {
        let ids = format!("{},{}", Uuid::from_u128(3), ADDR_B);
        let got = resolve(&dispatcher(), &ids, true).await.unwrap();

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ids, vec![addr(ADDR_B)]);
    }

    #[tokio::test]
    async fn uuid_with_known_address_maps_to_address_when_preferred() {
        let got = resolve(&dispatcher(), &Uuid::from_u128(3).to_string(), true)
            .await
            .unwrap();
        assert_eq!(got[0].ids, vec![addr(ADDR_B)]);
    }

    #[tokio::test]
    async fn uuid_without_address_stays_uuid() {
        let got = resolve(&dispatcher(), &Uuid::from_u128(4).to_string(), true)
            .await
            .unwrap();
        assert_eq!(got[0].ids, vec![DeviceId::Uuid(Uuid::from_u128(4))]);
    }

    #[tokio::test]
    async fn shared_address_recorded_once() {
        let ids = format!("{},{},{}", ADDR_A, Uuid::from_u128(1), Uuid::from_u128(2));
        let got = resolve(&dispatcher(), &ids, true).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ids, vec![addr(ADDR_A)]);
    }

    #[tokio::test]
    async fn without_preference_both_forms_recorded() {
        let ids = format!("{},{}", ADDR_B, Uuid::from_u128(3));
        let got = resolve(&dispatcher(), &ids, false).await.unwrap();
        assert_eq!(
            got[0].ids,
            vec![addr(ADDR_B), DeviceId::Uuid(Uuid::from_u128(3))]
        );
    }
}
