//! Engine fan-out: one local RPC to many engines, rank-ordered results.
//!
//! Calls are issued concurrently and joined before returning. Results are
//! sorted ascending by rank so callers see the same shape regardless of
//! completion order. No retries happen here.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strata_core::{Rank, RankSet};
use strata_engine::{Engine, EngineError, EngineResult, EngineSet, HasStatus, Method, invoke};
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};

/// Which engines a fan-out targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    All,
    Ranks(RankSet),
}

impl Targets {
    /// `None` or a nil rank means every engine.
    pub fn from_rank(rank: Option<Rank>) -> Self {
        match rank {
            Some(r) if !r.is_nil() => Targets::Ranks([r].into_iter().collect()),
            _ => Targets::All,
        }
    }

    fn includes(&self, engine: &dyn Engine) -> bool {
        match self {
            Targets::All => true,
            Targets::Ranks(set) => engine.rank().is_some_and(|r| set.contains(r)),
        }
    }
}

/// What to do with engines that are not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unready {
    /// Leave them out of the results (read paths).
    Skip,
    /// Report them as unreachable (write paths).
    MarkUnreachable,
}

/// Outcome from one engine.
#[derive(Debug)]
pub struct RankResult<T> {
    /// `Rank::NIL` for engines that have not joined.
    pub rank: Rank,
    pub index: u32,
    pub outcome: EngineResult<T>,
}

/// Stateless fan-out over an owned engine set.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    engines: EngineSet,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(engines: EngineSet) -> Self {
        Self {
            engines,
            timeout: None,
        }
    }

    /// Bound every call. Abandoned calls are not cancelled at the engine.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn engines(&self) -> &EngineSet {
        &self.engines
    }

    /// Issue `method` to every targeted engine concurrently.
    ///
    /// A non-zero embedded status becomes an [`EngineError::Status`] on that
    /// rank's outcome.
    pub async fn fan_out<Req, Resp>(
        &self,
        targets: &Targets,
        method: Method,
        req: &Req,
        unready: Unready,
    ) -> Vec<RankResult<Resp>>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + HasStatus,
    {
        let calls = self
            .engines
            .iter()
            .filter(|e| targets.includes(e.as_ref()))
            .filter(|e| e.is_ready() || unready == Unready::MarkUnreachable)
            .map(|engine| async move {
                let outcome = if engine.is_ready() {
                    self.call(engine.as_ref(), method, req).await
                } else {
                    Err(EngineError::NotReady {
                        index: engine.index(),
                    })
                };
                RankResult {
                    rank: engine.rank().unwrap_or(Rank::NIL),
                    index: engine.index(),
                    outcome,
                }
            });

        let mut results = join_all(calls).await;
        results.sort_by_key(|r| (r.rank, r.index));
        debug!(%method, count = results.len(), "fan-out complete");
        results
    }

    /// Call one engine, turning a non-zero status into an error.
    pub async fn call<Req, Resp>(&self, engine: &dyn Engine, method: Method, req: &Req) -> EngineResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + HasStatus,
    {
        let resp: Resp = self.call_raw(engine, method, req).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(EngineError::Status { method, status })
        }
    }

    /// Call one engine and return the response with its status untouched.
    pub async fn call_raw<Req, Resp>(&self, engine: &dyn Engine, method: Method, req: &Req) -> EngineResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let fut = invoke(engine, method, req);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                warn!(engine = engine.index(), %method, "call timed out");
                Err(EngineError::Timeout {
                    index: engine.index(),
                    method,
                })
            }),
            None => fut.await,
        }
    }

    /// Send one request through the first ready engine on this host.
    ///
    /// Used by pool operations whose request bodies carry the rank lists
    /// the engine fans out to. The embedded status is returned to the
    /// caller for interpretation.
    pub async fn call_local<Req, Resp>(&self, method: Method, req: &Req) -> DispatchResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let engine: &Arc<dyn Engine> = self.engines.first_ready().ok_or(DispatchError::NoReadyEngine)?;
        Ok(self.call_raw(engine.as_ref(), method, req).await?)
    }
}
