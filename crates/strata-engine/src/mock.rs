//! Scripted engine for tests.
//!
//! Replies are queued per method and consumed in order; when a method's
//! queue is empty its default reply (if any) is returned. Every call is
//! recorded so tests can assert on what was dispatched.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use strata_core::Rank;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::rpc::Method;

#[derive(Debug, Clone)]
enum Reply {
    Value(serde_json::Value),
    TransportError(String),
}

#[derive(Default)]
struct Script {
    queued: HashMap<Method, VecDeque<Reply>>,
    defaults: HashMap<Method, Reply>,
    calls: Vec<(Method, serde_json::Value)>,
}

/// Engine test double with scripted replies.
pub struct MockEngine {
    index: u32,
    targets: u32,
    rank: OnceLock<Rank>,
    ready: AtomicBool,
    delay: Option<Duration>,
    script: Arc<Mutex<Script>>,
}

impl MockEngine {
    /// A ready engine with eight targets and no rank.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            targets: 8,
            rank: OnceLock::new(),
            ready: AtomicBool::new(true),
            delay: None,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn with_rank(self, rank: Rank) -> Self {
        let _ = self.rank.set(rank);
        self
    }

    pub fn with_targets(mut self, targets: u32) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_ready(self, ready: bool) -> Self {
        self.set_ready(ready);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a typed reply for `method`.
    pub fn push_response<T: Serialize>(&self, method: Method, resp: &T) {
        let value = serde_json::to_value(resp).unwrap_or(serde_json::Value::Null);
        self.push_raw(method, value);
    }

    /// Queue a raw JSON reply for `method`.
    pub fn push_raw(&self, method: Method, value: serde_json::Value) {
        self.script()
            .queued
            .entry(method)
            .or_default()
            .push_back(Reply::Value(value));
    }

    /// Queue a transport failure for `method`.
    pub fn push_transport_error(&self, method: Method, reason: &str) {
        self.script()
            .queued
            .entry(method)
            .or_default()
            .push_back(Reply::TransportError(reason.to_string()));
    }

    /// Reply used whenever `method`'s queue is empty.
    pub fn set_default<T: Serialize>(&self, method: Method, resp: &T) {
        let value = serde_json::to_value(resp).unwrap_or(serde_json::Value::Null);
        self.script().defaults.insert(method, Reply::Value(value));
    }

    /// Every call received, in arrival order.
    pub fn calls(&self) -> Vec<(Method, serde_json::Value)> {
        self.script().calls.clone()
    }

    /// Request bodies received for one method.
    pub fn calls_for(&self, method: Method) -> Vec<serde_json::Value> {
        self.script()
            .calls
            .iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn index(&self) -> u32 {
        self.index
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn rank(&self) -> Option<Rank> {
        self.rank.get().copied()
    }

    fn target_count(&self) -> u32 {
        self.targets
    }

    async fn call(&self, method: Method, body: serde_json::Value) -> EngineResult<serde_json::Value> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let mut script = self.script();
            script.calls.push((method, body));
            let queued = script.queued.get_mut(&method).and_then(VecDeque::pop_front);
            match queued {
                Some(reply) => Some(reply),
                None => script.defaults.get(&method).cloned(),
            }
        };

        match reply {
            Some(Reply::Value(value)) => Ok(value),
            Some(Reply::TransportError(reason)) => Err(EngineError::Transport {
                index: self.index,
                method,
                reason,
            }),
            None => Err(EngineError::Transport {
                index: self.index,
                method,
                reason: "no scripted reply".to_string(),
            }),
        }
    }
}
