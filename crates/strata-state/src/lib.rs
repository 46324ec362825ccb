//! strata-state — system database for the Strata control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the pool catalog (pool service records plus a label index)
//! and cluster membership.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! [`StateStore`] is the raw typed CRUD layer; [`SystemDb`] wraps it with
//! leader gating, per-pool exclusive locks and rank assignment, and is what
//! the rest of the control plane talks to.
//!
//! Both are `Clone` + `Send` + `Sync` and can be shared across async tasks.

pub mod error;
pub mod faultdomain;
pub mod store;
pub mod sysdb;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use faultdomain::{FaultDomain, FaultDomainTree};
pub use store::StateStore;
pub use sysdb::{JoinResponse, PoolLock, SystemDb, epoch_secs};
pub use types::*;
