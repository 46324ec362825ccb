//! Pool destruction.
//!
//! A Ready pool is destroyed in two phases. First every handle is evicted
//! with the destroy flag set; the engine refuses if the pool is busy or
//! still has content (unless forced). Then the record moves to Destroying
//! and the destroy is sent to every member rank, not just the pool's own,
//! so targets on ranks that left the pool are reclaimed too. The record is
//! only removed once the destroy fully succeeds.

use strata_core::Status;
use strata_core::rank::ranks_to_u32;
use strata_engine::Method;
use strata_engine::rpc::{PoolDestroyReq, PoolEvictReq, PoolEvictResp, StatusResp};
use strata_state::{PoolService, PoolServiceState, epoch_secs};
use tracing::{info, warn};

use crate::error::PoolResult;
use crate::manager::PoolManager;
use crate::types::{PoolDestroyRequest, StatusResponse};

impl PoolManager {
    /// Destroy a pool.
    ///
    /// An unknown UUID yields [`Status::NonExistent`] rather than an error,
    /// so a retried destroy of a pool that is already gone is harmless.
    pub async fn destroy(&self, req: &PoolDestroyRequest) -> PoolResult<StatusResponse> {
        let uuid = self.resolve_uuid(&req.id)?;
        let lock = self.sysdb.lock_pool(uuid).await?;

        let Some(mut ps) = self.sysdb.find_pool_by_uuid(&uuid)? else {
            info!(pool = %uuid, "pool already gone");
            return Ok(Status::NonExistent.into());
        };

        if ps.state == PoolServiceState::Ready {
            let evict = PoolEvictReq {
                uuid,
                sys: self.system.clone(),
                svc_ranks: ranks_to_u32(&ps.replicas),
                handles: Vec::new(),
                destroy: true,
                force_destroy: req.force,
            };
            let resp: PoolEvictResp = self.dispatcher.call_local(Method::PoolEvict, &evict).await?;
            if !resp.status.is_success() {
                warn!(pool = %uuid, status = %resp.status, "pre-destroy evict refused, pool left ready");
                return Ok(resp.status.into());
            }
        }

        if ps.state != PoolServiceState::Destroying {
            ps.state = PoolServiceState::Destroying;
            ps.updated_at = epoch_secs();
            self.sysdb.update_pool_service(&lock, &ps)?;
        }

        let status = self.destroy_on_engines(&ps, req.force, req.recursive).await?;
        if status.is_success() {
            self.sysdb.remove_pool_service(&lock, uuid)?;
            info!(pool = %uuid, "pool destroyed");
        } else {
            warn!(pool = %uuid, %status, "pool destroy failed, record left destroying");
        }
        Ok(status.into())
    }

    /// Send the destroy to every member rank and return the engine status.
    pub(crate) async fn destroy_on_engines(
        &self,
        ps: &PoolService,
        force: bool,
        recursive: bool,
    ) -> PoolResult<Status> {
        let ranks = self.sysdb.member_ranks(None)?;
        let req = PoolDestroyReq {
            uuid: ps.uuid,
            sys: self.system.clone(),
            ranks: ranks_to_u32(&ranks),
            force,
            recursive,
        };
        let resp: StatusResp = self.dispatcher.call_local(Method::PoolDestroy, &req).await?;
        Ok(resp.status)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_core::Rank;
    use strata_engine::MockEngine;
    use strata_state::MemberState;
    use uuid::Uuid;

    use super::*;
    use crate::error::PoolError;
    use crate::manager::testutil::*;
    use crate::types::PoolId;

    fn destroy_req(uuid: Uuid) -> PoolDestroyRequest {
        PoolDestroyRequest {
            id: PoolId::Uuid(uuid),
            force: false,
            recursive: false,
        }
    }

    #[tokio::test]
    async fn destroy_targets_all_member_ranks() {
        let (mgr, engine) = harness(4).await;
        mgr.sysdb().set_member_state(Rank(3), MemberState::Stopped).unwrap();
        let uuid = seed_pool(&mgr, 1, "tank", &[0, 1]).await;
        engine.push_response(Method::PoolEvict, &PoolEvictResp::default());
        engine.push_response(Method::PoolDestroy, &StatusResp::default());

        let resp = mgr.destroy(&destroy_req(uuid)).await.unwrap();
        assert!(resp.status.is_success());
        assert!(mgr.sysdb().find_pool_by_uuid(&uuid).unwrap().is_none());

        let evict = &engine.calls_for(Method::PoolEvict)[0];
        assert_eq!(evict["destroy"], true);
        assert_eq!(evict["svc_ranks"], serde_json::json!([0, 1]));
        let destroy = &engine.calls_for(Method::PoolDestroy)[0];
        assert_eq!(destroy["ranks"], serde_json::json!([0, 1, 2, 3]));
    }

    #[tokio::test]
    async fn busy_evict_leaves_pool_ready() {
        for status in [Status::Busy, Status::NoService, Status::NotEmpty] {
            let (mgr, engine) = harness(1).await;
            let uuid = seed_pool(&mgr, 1, "tank", &[0]).await;
            engine.push_response(
                Method::PoolEvict,
                &PoolEvictResp {
                    status,
                    count: 0,
                },
            );

            let resp = mgr.destroy(&destroy_req(uuid)).await.unwrap();
            assert_eq!(resp.status, status);
            let ps = mgr.sysdb().find_pool_by_uuid(&uuid).unwrap().unwrap();
            assert_eq!(ps.state, PoolServiceState::Ready);
            assert!(engine.calls_for(Method::PoolDestroy).is_empty());
        }
    }

    #[tokio::test]
    async fn force_flag_reaches_evict_and_destroy() {
        let (mgr, engine) = harness(1).await;
        let uuid = seed_pool(&mgr, 1, "tank", &[0]).await;
        engine.push_response(Method::PoolEvict, &PoolEvictResp::default());
        engine.push_response(Method::PoolDestroy, &StatusResp::default());

        mgr.destroy(&PoolDestroyRequest {
            id: PoolId::Label("tank".into()),
            force: true,
            recursive: true,
        })
        .await
        .unwrap();
        assert_eq!(engine.calls_for(Method::PoolEvict)[0]["force_destroy"], true);
        let destroy = &engine.calls_for(Method::PoolDestroy)[0];
        assert_eq!(destroy["force"], true);
        assert_eq!(destroy["recursive"], true);
    }

    #[tokio::test]
    async fn failed_destroy_keeps_destroying_record() {
        let (mgr, engine) = harness(1).await;
        let uuid = seed_pool(&mgr, 1, "tank", &[0]).await;
        engine.push_response(Method::PoolEvict, &PoolEvictResp::default());
        engine.push_response(
            Method::PoolDestroy,
            &StatusResp {
                status: Status::TimedOut,
            },
        );

        let resp = mgr.destroy(&destroy_req(uuid)).await.unwrap();
        assert_eq!(resp.status, Status::TimedOut);
        let ps = mgr.sysdb().find_pool_by_uuid(&uuid).unwrap().unwrap();
        assert_eq!(ps.state, PoolServiceState::Destroying);

        // A retry skips the evict phase.
        engine.push_response(Method::PoolDestroy, &StatusResp::default());
        let resp = mgr.destroy(&destroy_req(uuid)).await.unwrap();
        assert!(resp.status.is_success());
        assert_eq!(engine.calls_for(Method::PoolEvict).len(), 1);
        assert!(mgr.sysdb().find_pool_by_uuid(&uuid).unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_uuid_is_nonexistent_unknown_label_is_error() {
        let (mgr, engine) = harness(1).await;
        let resp = mgr.destroy(&destroy_req(Uuid::from_u128(5))).await.unwrap();
        assert_eq!(resp.status, Status::NonExistent);

        let err = mgr
            .destroy(&PoolDestroyRequest {
                id: PoolId::Label("nope".into()),
                force: false,
                recursive: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::PoolNotFound(_)));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_destroys_are_serialized() {
        let engine = MockEngine::new(0)
            .with_rank(Rank(0))
            .with_delay(Duration::from_millis(20));
        let (mgr, engine) = harness_with(1, engine).await;
        let uuid = seed_pool(&mgr, 1, "tank", &[0]).await;
        engine.set_default(Method::PoolEvict, &PoolEvictResp::default());
        engine.set_default(Method::PoolDestroy, &StatusResp::default());

        let req = destroy_req(uuid);
        let (a, b) = tokio::join!(mgr.destroy(&req), mgr.destroy(&req));
        let mut statuses = vec![a.unwrap().status, b.unwrap().status];
        statuses.sort_by_key(|s| s.code());

        assert_eq!(statuses, vec![Status::NonExistent, Status::Success]);
        assert_eq!(engine.calls_for(Method::PoolEvict).len(), 1);
        assert_eq!(engine.calls_for(Method::PoolDestroy).len(), 1);
    }

    #[tokio::test]
    async fn engine_unreachable_is_error() {
        let (mgr, engine) = harness(1).await;
        let uuid = seed_pool(&mgr, 1, "tank", &[0]).await;
        engine.push_transport_error(Method::PoolEvict, "send failure");

        let err = mgr.destroy(&destroy_req(uuid)).await.unwrap_err();
        assert!(err.to_string().contains("send failure"), "{err}");
        assert!(mgr.sysdb().find_pool_by_uuid(&uuid).unwrap().unwrap().is_ready());
    }
}
