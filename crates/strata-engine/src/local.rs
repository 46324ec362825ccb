//! Live engine handle speaking length-prefixed JSON frames over the
//! engine's local Unix socket.
//!
//! Each call opens a fresh connection, sends one request frame
//! `{"method": .., "body": ..}` and reads one response frame holding the
//! response body. Frames are delimited by a big-endian `u32` length.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use strata_core::Rank;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::engine::{Engine, invoke};
use crate::error::{EngineError, EngineResult};
use crate::rpc::{HasStatus, Method, SetRankReq, SetUpReq, StatusResp};

/// Frames above this size are rejected in both directions.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct RequestFrame {
    method: Method,
    body: serde_json::Value,
}

pub(crate) fn framed(stream: UnixStream) -> Framed<UnixStream, LengthDelimitedCodec> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    Framed::new(stream, codec)
}

/// Handle for an engine process on this host.
#[derive(Debug)]
pub struct LocalEngine {
    index: u32,
    socket: PathBuf,
    targets: u32,
    rank: OnceLock<Rank>,
    ready: AtomicBool,
    timeout: Duration,
}

impl LocalEngine {
    pub fn new(index: u32, socket: impl Into<PathBuf>, targets: u32) -> Self {
        Self {
            index,
            socket: socket.into(),
            targets,
            rank: OnceLock::new(),
            ready: AtomicBool::new(false),
            timeout: Duration::from_secs(30),
        }
    }

    /// Per-call timeout. A timed-out call is abandoned, not cancelled.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn set_ready(&self, ready: bool) {
        let was = self.ready.swap(ready, Ordering::SeqCst);
        if was != ready {
            info!(engine = self.index, ready, "engine readiness changed");
        }
    }

    /// Check the engine socket accepts connections and update readiness.
    pub async fn probe(&self) -> bool {
        let ok = UnixStream::connect(&self.socket).await.is_ok();
        self.set_ready(ok);
        ok
    }

    /// Complete the join protocol: hand the engine its rank, then tell it
    /// to finish setup. The rank can be set only once.
    pub async fn finish_join(&self, rank: Rank, map_version: u64) -> EngineResult<()> {
        if let Some(&current) = self.rank.get() {
            if current != rank {
                return Err(EngineError::RankAlreadySet {
                    index: self.index,
                    current,
                    requested: rank,
                });
            }
        }

        let req = SetRankReq {
            rank: rank.0,
            map_version,
        };
        let resp: StatusResp = invoke(self, Method::SetRank, &req).await?;
        check(Method::SetRank, &resp)?;
        if self.rank.set(rank).is_err() {
            // A concurrent join won the race.
            let current = self.rank.get().copied().unwrap_or(rank);
            if current != rank {
                return Err(EngineError::RankAlreadySet {
                    index: self.index,
                    current,
                    requested: rank,
                });
            }
        }

        let resp: StatusResp = invoke(self, Method::SetUp, &SetUpReq {}).await?;
        check(Method::SetUp, &resp)?;

        info!(engine = self.index, %rank, map_version, "engine joined");
        Ok(())
    }

    async fn exchange(&self, method: Method, body: serde_json::Value) -> EngineResult<serde_json::Value> {
        let transport = |e: io::Error| EngineError::Transport {
            index: self.index,
            method,
            reason: e.to_string(),
        };

        let frame = serde_json::to_vec(&RequestFrame { method, body }).map_err(|e| {
            EngineError::Encode {
                method,
                reason: e.to_string(),
            }
        })?;

        let stream = UnixStream::connect(&self.socket).await.map_err(transport)?;
        let mut conn = framed(stream);
        conn.send(Bytes::from(frame)).await.map_err(transport)?;
        let reply = match conn.next().await {
            Some(frame) => frame.map_err(transport)?,
            None => return Err(transport(io::ErrorKind::UnexpectedEof.into())),
        };

        serde_json::from_slice(&reply).map_err(|e| EngineError::Decode {
            method,
            reason: e.to_string(),
        })
    }
}

fn check<R: HasStatus>(method: Method, resp: &R) -> EngineResult<()> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(EngineError::Status { method, status })
    }
}

#[async_trait]
impl Engine for LocalEngine {
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
        if !self.is_ready() {
            return Err(EngineError::NotReady { index: self.index });
        }
        debug!(engine = self.index, %method, "local rpc");
        match tokio::time::timeout(self.timeout, self.exchange(method, body)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(engine = self.index, %method, timeout = ?self.timeout, "local rpc timed out");
                Err(EngineError::Timeout {
                    index: self.index,
                    method,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    use super::*;
    use strata_core::Status;

    /// Answer every framed request with `reply(method, body)`. Connections
    /// that close without a frame (readiness probes) are ignored.
    fn serve<F>(listener: UnixListener, reply: F) -> Arc<Mutex<Vec<Method>>>
    where
        F: Fn(Method, &serde_json::Value) -> serde_json::Value + Send + 'static,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let mut conn = framed(stream);
                let Some(Ok(frame)) = conn.next().await else {
                    continue;
                };
                let req: RequestFrame = serde_json::from_slice(&frame).unwrap();
                seen2.lock().unwrap().push(req.method);
                let resp = serde_json::to_vec(&reply(req.method, &req.body)).unwrap();
                conn.send(Bytes::from(resp)).await.unwrap();
            }
        });
        seen
    }

    #[tokio::test]
    async fn call_round_trips_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine0.sock");
        let listener = UnixListener::bind(&path).unwrap();
        serve(listener, |_, body| serde_json::json!({"status": 0, "echo": body}));

        let engine = LocalEngine::new(0, &path, 8);
        assert!(engine.probe().await);

        let resp = engine
            .call(Method::PoolQuery, serde_json::json!({"uuid": "abc"}))
            .await
            .unwrap();
        assert_eq!(resp["echo"]["uuid"], "abc");
    }

    #[tokio::test]
    async fn call_on_unready_engine_fails() {
        let engine = LocalEngine::new(1, "/nonexistent/engine.sock", 8);
        assert!(!engine.probe().await);
        let err = engine
            .call(Method::SetUp, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotReady { index: 1 }));
    }

    #[tokio::test]
    async fn finish_join_sets_rank_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine0.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let seen = serve(listener, |_, _| serde_json::json!({"status": 0}));

        let engine = LocalEngine::new(0, &path, 8);
        engine.set_ready(true);
        engine.finish_join(Rank(3), 7).await.unwrap();

        assert_eq!(engine.rank(), Some(Rank(3)));
        assert_eq!(*seen.lock().unwrap(), vec![Method::SetRank, Method::SetUp]);

        let err = engine.finish_join(Rank(4), 8).await.unwrap_err();
        assert!(matches!(err, EngineError::RankAlreadySet { .. }));
    }

    #[tokio::test]
    async fn concurrent_joins_set_one_rank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine0.sock");
        let listener = UnixListener::bind(&path).unwrap();
        serve(listener, |_, _| serde_json::json!({"status": 0}));

        let engine = LocalEngine::new(0, &path, 8);
        engine.set_ready(true);
        let (a, b) = tokio::join!(engine.finish_join(Rank(1), 1), engine.finish_join(Rank(2), 1));

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        let EngineError::RankAlreadySet { current, requested, .. } = err else {
            panic!("unexpected error: {err}");
        };
        assert_ne!(current, requested);
        assert_eq!(engine.rank(), Some(current));
    }

    #[tokio::test]
    async fn oversize_reply_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine0.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream.write_u32(MAX_FRAME_BYTES as u32 + 1).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let engine = LocalEngine::new(0, &path, 8);
        engine.set_ready(true);
        let err = engine
            .call(Method::PoolQuery, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport { .. }), "{err}");
    }

    #[tokio::test]
    async fn oversize_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine0.sock");
        let listener = UnixListener::bind(&path).unwrap();
        serve(listener, |_, _| serde_json::json!({"status": 0}));

        let engine = LocalEngine::new(0, &path, 8);
        engine.set_ready(true);
        let huge = "x".repeat(MAX_FRAME_BYTES + 1);
        let err = engine
            .call(Method::PoolSetProp, serde_json::json!({ "value": huge }))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport { .. }), "{err}");
    }

    #[tokio::test]
    async fn finish_join_surfaces_engine_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine0.sock");
        let listener = UnixListener::bind(&path).unwrap();
        serve(listener, |_, _| serde_json::json!({"status": -1003}));

        let engine = LocalEngine::new(0, &path, 8);
        engine.set_ready(true);
        let err = engine.finish_join(Rank(0), 1).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Status {
                method: Method::SetRank,
                status: Status::Invalid
            }
        ));
        assert_eq!(engine.rank(), None);
    }
}
