//! Local engine bring-up.
//!
//! Each configured engine gets a stable identity persisted under the data
//! directory, so a restarted daemon rejoins with the same rank. The join
//! loop probes every engine's socket; an engine that comes up is admitted
//! to the membership and handed its rank, and an engine that goes away is
//! marked stopped.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use strata_engine::{Engine, LocalEngine};
use strata_state::{MemberState, SystemDb};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Read engine `index`'s identity from `data_dir`, creating it on first use.
pub fn engine_uuid(data_dir: &Path, index: u32) -> anyhow::Result<Uuid> {
    let path = data_dir.join(format!("engine{index}.uuid"));
    match std::fs::read_to_string(&path) {
        Ok(s) => Uuid::parse_str(s.trim()).with_context(|| format!("corrupt identity file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let uuid = Uuid::new_v4();
            std::fs::write(&path, format!("{uuid}\n"))
                .with_context(|| format!("write identity file {}", path.display()))?;
            info!(engine = index, %uuid, "engine identity created");
            Ok(uuid)
        }
        Err(e) => Err(e).with_context(|| format!("read identity file {}", path.display())),
    }
}

struct Managed {
    engine: Arc<LocalEngine>,
    uuid: Uuid,
    fault_domain: Option<String>,
    joined: AtomicBool,
}

/// Probes local engines and drives the join protocol.
pub struct JoinLoop {
    sysdb: SystemDb,
    addr: String,
    interval: Duration,
    engines: Vec<Managed>,
}

impl JoinLoop {
    pub fn new(sysdb: SystemDb, addr: impl Into<String>, interval: Duration) -> Self {
        Self {
            sysdb,
            addr: addr.into(),
            interval,
            engines: Vec::new(),
        }
    }

    pub fn add(&mut self, engine: Arc<LocalEngine>, uuid: Uuid, fault_domain: Option<String>) {
        self.engines.push(Managed {
            engine,
            uuid,
            fault_domain,
            joined: AtomicBool::new(false),
        });
    }

    /// Probe every engine once. Returns how many joined in this pass.
    pub async fn pass(&self) -> usize {
        let mut joined = 0;
        for m in &self.engines {
            let ready = m.engine.probe().await;
            let was_joined = m.joined.load(Ordering::SeqCst);

            if ready && !was_joined {
                match self.join(m).await {
                    Ok(()) => {
                        m.joined.store(true, Ordering::SeqCst);
                        joined += 1;
                    }
                    Err(e) => warn!(engine = m.engine.index(), error = %e, "engine join failed"),
                }
            } else if !ready && was_joined {
                m.joined.store(false, Ordering::SeqCst);
                if let Some(rank) = m.engine.rank() {
                    if let Err(e) = self.sysdb.set_member_state(rank, MemberState::Stopped) {
                        warn!(%rank, error = %e, "failed to mark member stopped");
                    }
                }
            }
        }
        joined
    }

    async fn join(&self, m: &Managed) -> anyhow::Result<()> {
        let resp = self
            .sysdb
            .join(m.uuid, &self.addr, m.fault_domain.as_deref())
            .await?;
        m.engine
            .finish_join(resp.member.rank, resp.map_version)
            .await?;
        debug!(engine = m.engine.index(), rank = %resp.member.rank, rejoined = resp.rejoined, "engine admitted");
        Ok(())
    }

    /// Run until `shutdown` changes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(engines = self.engines.len(), interval_secs = self.interval.as_secs(), "engine join loop started");
        self.pass().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.pass().await;
                }
                _ = shutdown.changed() => {
                    info!("engine join loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use strata_core::Rank;
    use strata_state::StateStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// A fake engine answering every request with a success status.
    fn fake_engine(path: PathBuf) -> JoinHandle<()> {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(len) = stream.read_u32().await else {
                        return;
                    };
                    let mut buf = vec![0u8; len as usize];
                    if stream.read_exact(&mut buf).await.is_err() {
                        return;
                    }
                    let reply = serde_json::to_vec(&serde_json::json!({"status": 0})).unwrap();
                    let _ = stream.write_u32(reply.len() as u32).await;
                    let _ = stream.write_all(&reply).await;
                });
            }
        })
    }

    #[test]
    fn identity_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let first = engine_uuid(dir.path(), 0).unwrap();
        let again = engine_uuid(dir.path(), 0).unwrap();
        let other = engine_uuid(dir.path(), 1).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn corrupt_identity_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("engine0.uuid"), "garbage").unwrap();
        assert!(engine_uuid(dir.path(), 0).is_err());
    }

    #[tokio::test]
    async fn absent_engine_is_not_joined() {
        let dir = tempfile::tempdir().unwrap();
        let sysdb = SystemDb::new(StateStore::open_in_memory().unwrap());
        let mut joiner = JoinLoop::new(sysdb.clone(), "host0:10001", Duration::from_secs(60));
        let engine = Arc::new(LocalEngine::new(0, dir.path().join("missing.sock"), 8));
        joiner.add(Arc::clone(&engine), Uuid::from_u128(1), None);

        assert_eq!(joiner.pass().await, 0);
        assert!(!engine.is_ready());
        assert!(sysdb.all_members().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_joins_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("engine0.sock");
        let server = fake_engine(socket.clone());

        let sysdb = SystemDb::new(StateStore::open_in_memory().unwrap());
        let mut joiner = JoinLoop::new(sysdb.clone(), "host0:10001", Duration::from_secs(60));
        let engine = Arc::new(LocalEngine::new(0, &socket, 8));
        joiner.add(Arc::clone(&engine), Uuid::from_u128(1), None);

        assert_eq!(joiner.pass().await, 1);
        assert_eq!(engine.rank(), Some(Rank(0)));
        let member = sysdb.find_member_by_rank(Rank(0)).unwrap().unwrap();
        assert_eq!(member.state, MemberState::Joined);

        // A second pass with the engine still up changes nothing.
        assert_eq!(joiner.pass().await, 0);

        server.abort();
        let _ = server.await;
        std::fs::remove_file(&socket).unwrap();
        assert_eq!(joiner.pass().await, 0);
        let member = sysdb.find_member_by_rank(Rank(0)).unwrap().unwrap();
        assert_eq!(member.state, MemberState::Stopped);
    }
}
