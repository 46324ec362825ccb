//! Error types for pool lifecycle operations.

use std::sync::Arc;

use strata_core::RankSet;
use strata_dispatch::DispatchError;
use strata_engine::EngineError;
use strata_state::{PoolServiceState, StateError};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur while orchestrating a pool operation.
///
/// Validation variants are raised before the catalog or any engine is
/// touched. Non-zero engine statuses are not errors; they are returned in
/// the operation's response.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid pool identifier {0:?}")]
    InvalidId(String),

    #[error("invalid UUID: pool UUID must be set")]
    InvalidUuid,

    #[error("pool label is required")]
    LabelRequired,

    #[error("pool label {label:?} already in use by pool {owner}")]
    DuplicateLabel { label: String, owner: Uuid },

    #[error("invalid ranks {0}")]
    InvalidRanks(RankSet),

    #[error("no joined ranks available")]
    NoRanks,

    #[error("requested {requested} ranks, only {available} joined")]
    NotEnoughRanks { requested: u32, available: usize },

    #[error("requested {requested} service replicas, maximum is {max}")]
    TooManySvcReps { requested: u32, max: u32 },

    #[error("zero target count")]
    ZeroTargetCount,

    #[error("SCM size {bytes} is below the minimum {min} for {targets} targets")]
    ScmTooSmall { bytes: u64, min: u64, targets: u32 },

    #[error("NVMe size {bytes} is below the minimum {min} for {targets} targets")]
    NvmeTooSmall { bytes: u64, min: u64, targets: u32 },

    #[error("invalid pool size: {0}")]
    InvalidSize(String),

    #[error("pool {0} not found")]
    PoolNotFound(String),

    #[error("pool {uuid} is {state}")]
    NotReady { uuid: Uuid, state: PoolServiceState },

    #[error("{0}")]
    Property(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("evict batcher is not running")]
    BatcherClosed,

    /// Shared failure of a merged evict call.
    #[error(transparent)]
    Batched(Arc<PoolError>),
}

impl PoolError {
    pub(crate) fn property(msg: &str) -> Self {
        PoolError::Property(msg.to_string())
    }

    /// Failures that mean no engine could take the request right now.
    pub fn is_unreachable(&self) -> bool {
        match self {
            PoolError::Dispatch(DispatchError::NoReadyEngine) => true,
            PoolError::Dispatch(DispatchError::Engine(e)) | PoolError::Engine(e) => e.is_transport(),
            PoolError::Batched(inner) => inner.is_unreachable(),
            _ => false,
        }
    }
}
