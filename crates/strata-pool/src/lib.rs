//! strata-pool — pool lifecycle orchestration.
//!
//! [`PoolManager`] implements the administrative pool operations on top
//! of the system database (`strata-state`) and the engine dispatcher
//! (`strata-dispatch`):
//!
//! - create, with idempotent retries and compensation on failure,
//! - destroy, in two phases (evict, then destroy on every member rank),
//! - extend, evict, exclude, drain, reintegrate, query, list,
//! - set-prop and get-prop with name/number translation,
//! - get, overwrite, update and delete of pool ACL entries.
//!
//! [`Sweeper`] cleans up records left in intermediate states and
//! [`EvictBatcher`] coalesces evictions that arrive close together.

pub mod acl;
pub mod create;
pub mod destroy;
pub mod error;
pub mod evict_batch;
pub mod manager;
pub mod ops;
pub mod property;
pub mod sweep;
pub mod types;

pub use create::Compensation;
pub use error::{PoolError, PoolResult};
pub use evict_batch::EvictBatcher;
pub use manager::PoolManager;
pub use ops::TargetOp;
pub use sweep::Sweeper;
pub use types::*;
