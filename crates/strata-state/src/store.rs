//! StateStore: redb-backed persistence for the pool catalog and membership.
//!
//! Provides typed CRUD operations over pool service records, the pool
//! label index, members and the group map version. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! The store enforces record-level invariants (UUID and label uniqueness)
//! inside a single write transaction. Leadership and per-pool locking live
//! one layer up in [`crate::SystemDb`].

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use strata_core::Rank;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(POOL_LABELS).map_err(map_err!(Table))?;
        txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        txn.open_table(SYSTEM).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Insert a new pool service record.
    ///
    /// Fails if the UUID is already present or the label belongs to
    /// another pool; in either case nothing is written.
    pub fn insert_pool(&self, ps: &PoolService) -> StateResult<()> {
        let key = ps.table_key();
        let value = serde_json::to_vec(ps).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            if pools.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::PoolExists(ps.uuid));
            }
            let mut labels = txn.open_table(POOL_LABELS).map_err(map_err!(Table))?;
            if let Some(label) = &ps.label {
                claim_label(&mut labels, label, &ps.uuid)?;
            }
            pools
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = %ps.state, "pool service inserted");
        Ok(())
    }

    /// Update an existing pool service record, keeping the label index in step.
    pub fn update_pool(&self, ps: &PoolService) -> StateResult<()> {
        let key = ps.table_key();
        let value = serde_json::to_vec(ps).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            let old: PoolService = match pools.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("pool {key}"))),
            };

            let mut labels = txn.open_table(POOL_LABELS).map_err(map_err!(Table))?;
            if old.label != ps.label {
                if let Some(label) = &ps.label {
                    claim_label(&mut labels, label, &ps.uuid)?;
                }
                if let Some(old_label) = &old.label {
                    labels.remove(old_label.as_str()).map_err(map_err!(Write))?;
                }
            }
            pools
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = %ps.state, "pool service updated");
        Ok(())
    }

    /// Get a pool service record by UUID.
    pub fn get_pool(&self, uuid: &Uuid) -> StateResult<Option<PoolService>> {
        let key = pool_key(uuid);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let ps: PoolService =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(ps))
            }
            None => Ok(None),
        }
    }

    /// Look up the pool UUID registered under a label.
    pub fn pool_uuid_for_label(&self, label: &str) -> StateResult<Option<Uuid>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_LABELS).map_err(map_err!(Table))?;
        match table.get(label).map_err(map_err!(Read))? {
            Some(guard) => {
                let uuid = Uuid::parse_str(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(uuid))
            }
            None => Ok(None),
        }
    }

    /// List all pool service records.
    pub fn list_pools(&self) -> StateResult<Vec<PoolService>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let ps: PoolService =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(ps);
        }
        Ok(results)
    }

    /// Delete a pool service record and its label entry. Returns true if it existed.
    pub fn delete_pool(&self, uuid: &Uuid) -> StateResult<bool> {
        let key = pool_key(uuid);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            let old: Option<PoolService> = match pools.remove(key.as_str()).map_err(map_err!(Write))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            existed = old.is_some();
            if let Some(label) = old.and_then(|ps| ps.label) {
                let mut labels = txn.open_table(POOL_LABELS).map_err(map_err!(Table))?;
                labels.remove(label.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "pool service deleted");
        Ok(existed)
    }

    // ── Members ────────────────────────────────────────────────────

    /// Insert or update a member.
    pub fn put_member(&self, member: &Member) -> StateResult<()> {
        let key = member.table_key();
        let value = serde_json::to_vec(member).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a member by rank.
    pub fn get_member(&self, rank: Rank) -> StateResult<Option<Member>> {
        let key = member_key(rank);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let member: Member =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(member))
            }
            None => Ok(None),
        }
    }

    /// List all members, rank-ascending.
    pub fn list_members(&self) -> StateResult<Vec<Member>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let member: Member =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(member);
        }
        Ok(results)
    }

    /// Delete a member by rank. Returns true if it existed.
    pub fn delete_member(&self, rank: Rank) -> StateResult<bool> {
        let key = member_key(rank);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── System ─────────────────────────────────────────────────────

    /// Current group map version (0 before any membership change).
    pub fn map_version(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SYSTEM).map_err(map_err!(Table))?;
        Ok(table
            .get(MAP_VERSION_KEY)
            .map_err(map_err!(Read))?
            .map(|g| g.value())
            .unwrap_or(0))
    }

    /// Increment the group map version and return the new value.
    pub fn bump_map_version(&self) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(SYSTEM).map_err(map_err!(Table))?;
            let current = table
                .get(MAP_VERSION_KEY)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0);
            next = current + 1;
            table.insert(MAP_VERSION_KEY, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(version = next, "group map version bumped");
        Ok(next)
    }
}

/// Point `label` at `uuid`, failing if another pool already owns it.
fn claim_label(labels: &mut Table<&str, &str>, label: &str, uuid: &Uuid) -> StateResult<()> {
    let owner = labels
        .get(label)
        .map_err(map_err!(Read))?
        .map(|g| g.value().to_string());
    if let Some(owner) = owner {
        let owner = Uuid::parse_str(&owner).map_err(map_err!(Deserialize))?;
        if owner != *uuid {
            return Err(StateError::LabelExists {
                label: label.to_string(),
                owner,
            });
        }
    }
    labels
        .insert(label, pool_key(uuid).as_str())
        .map_err(map_err!(Write))?;
    Ok(())
}
