//! The engine handle seam and the owned collection of handles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strata_core::Rank;

use crate::error::{EngineError, EngineResult};
use crate::rpc::Method;

/// One managed engine process.
///
/// Implementations carry the request as an untyped JSON body; use
/// [`invoke`] for typed calls.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Position in the local configuration.
    fn index(&self) -> u32;

    /// Started and responsive.
    fn is_ready(&self) -> bool;

    /// Rank assigned by join, `None` until then.
    fn rank(&self) -> Option<Rank>;

    fn target_count(&self) -> u32;

    /// Issue one local RPC.
    async fn call(&self, method: Method, body: serde_json::Value) -> EngineResult<serde_json::Value>;
}

/// Typed wrapper over [`Engine::call`].
pub async fn invoke<Req, Resp>(engine: &dyn Engine, method: Method, req: &Req) -> EngineResult<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let body = serde_json::to_value(req).map_err(|e| EngineError::Encode {
        method,
        reason: e.to_string(),
    })?;
    let raw = engine.call(method, body).await?;
    serde_json::from_value(raw).map_err(|e| EngineError::Decode {
        method,
        reason: e.to_string(),
    })
}

/// Owned, append-only set of engine handles.
///
/// Built once at startup and passed by value (cloning shares the handles).
#[derive(Clone, Default)]
pub struct EngineSet {
    engines: Vec<Arc<dyn Engine>>,
}

impl EngineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, engine: Arc<dyn Engine>) {
        self.engines.push(engine);
    }

    pub fn with(mut self, engine: Arc<dyn Engine>) -> Self {
        self.push(engine);
        self
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Engine>> {
        self.engines.iter()
    }

    pub fn get(&self, index: u32) -> Option<&Arc<dyn Engine>> {
        self.engines.iter().find(|e| e.index() == index)
    }

    pub fn by_rank(&self, rank: Rank) -> Option<&Arc<dyn Engine>> {
        self.engines.iter().find(|e| e.rank() == Some(rank))
    }

    /// First engine that is ready, in index order.
    pub fn first_ready(&self) -> Option<&Arc<dyn Engine>> {
        self.engines.iter().find(|e| e.is_ready())
    }

    pub fn ready_count(&self) -> usize {
        self.engines.iter().filter(|e| e.is_ready()).count()
    }
}

impl std::fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.engines.iter().map(|e| (e.index(), e.rank(), e.is_ready())))
            .finish()
    }
}

impl FromIterator<Arc<dyn Engine>> for EngineSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Engine>>>(iter: I) -> Self {
        Self {
            engines: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;
    use crate::rpc::{ListSmdDevicesReq, ListSmdDevicesResp, SmdDevice, StatusResp};

    #[tokio::test]
    async fn invoke_decodes_typed_response() {
        let engine = MockEngine::new(0).with_rank(Rank(0));
        engine.push_response(
            Method::ListSmdDevices,
            &ListSmdDevicesResp {
                devices: vec![SmdDevice::default()],
                ..Default::default()
            },
        );

        let resp: ListSmdDevicesResp =
            invoke(&engine, Method::ListSmdDevices, &ListSmdDevicesReq {})
                .await
                .unwrap();
        assert_eq!(resp.devices.len(), 1);
    }

    #[tokio::test]
    async fn invoke_reports_decode_failure() {
        let engine = MockEngine::new(0);
        engine.push_raw(Method::SetUp, serde_json::json!({"status": "bogus"}));

        let err = invoke::<_, StatusResp>(&engine, Method::SetUp, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Decode { method: Method::SetUp, .. }));
        assert!(err.to_string().starts_with("unmarshal SetUp response"));
    }

    #[test]
    fn engine_set_lookups() {
        let set: EngineSet = [
            Arc::new(MockEngine::new(0).with_rank(Rank(4)).with_ready(false)) as Arc<dyn Engine>,
            Arc::new(MockEngine::new(1).with_rank(Rank(2))),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.by_rank(Rank(2)).map(|e| e.index()), Some(1));
        assert_eq!(set.first_ready().map(|e| e.index()), Some(1));
        assert_eq!(set.ready_count(), 1);
        assert!(set.get(3).is_none());
    }
}
