//! Evict request batching.
//!
//! Evictions arriving within one window are grouped by pool and sent as a
//! single engine call per pool. Every waiter receives the merged call's
//! result. A request for all handles absorbs the handle lists of the
//! others in its group.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PoolError, PoolResult};
use crate::manager::PoolManager;
use crate::types::{PoolEvictRequest, PoolEvictResponse, PoolId};

type Reply = Result<PoolEvictResponse, Arc<PoolError>>;

struct EvictJob {
    uuid: Uuid,
    handles: Vec<Uuid>,
    reply: oneshot::Sender<Reply>,
}

/// Handle for submitting evictions to the batching task.
#[derive(Clone)]
pub struct EvictBatcher {
    tx: mpsc::Sender<EvictJob>,
    manager: PoolManager,
}

impl EvictBatcher {
    /// Start the batching task. It exits when `shutdown` changes or every
    /// batcher handle is dropped.
    pub fn spawn(
        manager: PoolManager,
        window: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let task = tokio::spawn(run(manager.clone(), window, rx, shutdown));
        (Self { tx, manager }, task)
    }

    /// Queue an eviction and wait for the merged result.
    pub async fn evict(&self, req: PoolEvictRequest) -> PoolResult<PoolEvictResponse> {
        let uuid = self.manager.resolve_uuid(&req.id)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EvictJob {
                uuid,
                handles: req.handles,
                reply,
            })
            .await
            .map_err(|_| PoolError::BatcherClosed)?;
        rx.await
            .map_err(|_| PoolError::BatcherClosed)?
            .map_err(PoolError::Batched)
    }
}

/// Union of handle lists, or empty (all handles) if any job asked for all.
fn merge_handles(jobs: &[EvictJob]) -> Vec<Uuid> {
    if jobs.iter().any(|j| j.handles.is_empty()) {
        return Vec::new();
    }
    let mut handles: Vec<Uuid> = jobs.iter().flat_map(|j| j.handles.iter().copied()).collect();
    handles.sort_unstable();
    handles.dedup();
    handles
}

async fn run(
    manager: PoolManager,
    window: Duration,
    mut rx: mpsc::Receiver<EvictJob>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(window_ms = window.as_millis() as u64, "evict batcher started");
    loop {
        let first = tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let mut batch = vec![first];
        let deadline = Instant::now() + window;
        loop {
            tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => batch.push(job),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let mut groups: BTreeMap<Uuid, Vec<EvictJob>> = BTreeMap::new();
        for job in batch {
            groups.entry(job.uuid).or_default().push(job);
        }
        debug!(pools = groups.len(), "dispatching evict batch");

        let calls = groups.into_values().map(|jobs| {
            let manager = &manager;
            async move {
                let req = PoolEvictRequest {
                    id: PoolId::Uuid(jobs[0].uuid),
                    handles: merge_handles(&jobs),
                };
                let result: Reply = manager.evict(&req).await.map_err(Arc::new);
                for job in jobs {
                    // A waiter that gave up is not an error.
                    let _ = job.reply.send(result.clone());
                }
            }
        });
        join_all(calls).await;
    }
    info!("evict batcher stopped");
}

#[cfg(test)]
mod tests {
    use strata_core::Status;
    use strata_engine::Method;
    use strata_engine::rpc::PoolEvictResp;

    use super::*;
    use crate::manager::testutil::*;

    fn req(uuid: Uuid, handles: &[u128]) -> PoolEvictRequest {
        PoolEvictRequest {
            id: PoolId::Uuid(uuid),
            handles: handles.iter().copied().map(Uuid::from_u128).collect(),
        }
    }

    #[tokio::test]
    async fn same_pool_requests_merge() {
        let (mgr, engine) = harness(1).await;
        let a = seed_pool(&mgr, 1, "a", &[0]).await;
        let b = seed_pool(&mgr, 2, "b", &[0]).await;
        engine.set_default(
            Method::PoolEvict,
            &PoolEvictResp {
                status: Status::Success,
                count: 3,
            },
        );
        let (_tx, shutdown) = watch::channel(false);
        let (batcher, _task) = EvictBatcher::spawn(mgr, Duration::from_millis(50), shutdown);

        let (r1, r2, r3) = tokio::join!(
            batcher.evict(req(a, &[12, 10])),
            batcher.evict(req(a, &[11, 10])),
            batcher.evict(req(b, &[20])),
        );
        assert_eq!(r1.unwrap().count, 3);
        assert_eq!(r2.unwrap().count, 3);
        assert!(r3.unwrap().status.is_success());

        let calls = engine.calls_for(Method::PoolEvict);
        assert_eq!(calls.len(), 2);
        let for_a = calls
            .iter()
            .find(|c| c["uuid"] == serde_json::json!(a))
            .unwrap();
        let want: Vec<Uuid> = [10u128, 11, 12].into_iter().map(Uuid::from_u128).collect();
        assert_eq!(for_a["handles"], serde_json::json!(want));
    }

    #[tokio::test]
    async fn evict_all_absorbs_handle_lists() {
        let (mgr, engine) = harness(1).await;
        let a = seed_pool(&mgr, 1, "a", &[0]).await;
        engine.set_default(Method::PoolEvict, &PoolEvictResp::default());
        let (_tx, shutdown) = watch::channel(false);
        let (batcher, _task) = EvictBatcher::spawn(mgr, Duration::from_millis(50), shutdown);

        let (r1, r2) = tokio::join!(batcher.evict(req(a, &[1])), batcher.evict(req(a, &[])));
        r1.unwrap();
        r2.unwrap();
        let calls = engine.calls_for(Method::PoolEvict);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["handles"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn shared_failure_reaches_every_waiter() {
        let (mgr, _engine) = harness(1).await;
        let a = seed_pool(&mgr, 1, "a", &[0]).await;
        // No scripted reply: the engine call fails.
        let (_tx, shutdown) = watch::channel(false);
        let (batcher, _task) = EvictBatcher::spawn(mgr, Duration::from_millis(20), shutdown);

        let (r1, r2) = tokio::join!(batcher.evict(req(a, &[1])), batcher.evict(req(a, &[2])));
        assert!(matches!(r1, Err(PoolError::Batched(_))));
        assert!(r2.unwrap_err().is_unreachable());
    }

    #[tokio::test]
    async fn closed_batcher_reports_error() {
        let (mgr, _engine) = harness(1).await;
        let a = seed_pool(&mgr, 1, "a", &[0]).await;
        let (tx, shutdown) = watch::channel(false);
        let (batcher, task) = EvictBatcher::spawn(mgr, Duration::from_millis(20), shutdown);
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(matches!(
            batcher.evict(req(a, &[1])).await,
            Err(PoolError::BatcherClosed)
        ));
    }
}
