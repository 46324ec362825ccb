//! Error types for engine calls.

use strata_core::{Rank, Status};
use thiserror::Error;

use crate::rpc::Method;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine {index} not ready")]
    NotReady { index: u32 },

    #[error("engine {index}: {method} transport failure: {reason}")]
    Transport {
        index: u32,
        method: Method,
        reason: String,
    },

    #[error("engine {index}: {method} timed out")]
    Timeout { index: u32, method: Method },

    #[error("encode {method} request: {reason}")]
    Encode { method: Method, reason: String },

    #[error("unmarshal {method} response: {reason}")]
    Decode { method: Method, reason: String },

    #[error("{method} returned {status}")]
    Status { method: Method, status: Status },

    #[error("engine {index} already has rank {current}, cannot set {requested}")]
    RankAlreadySet {
        index: u32,
        current: Rank,
        requested: Rank,
    },
}

impl EngineError {
    /// Failures where the engine never produced a response.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineError::NotReady { .. }
                | EngineError::Transport { .. }
                | EngineError::Timeout { .. }
        )
    }
}
