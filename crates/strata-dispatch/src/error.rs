//! Error types for dispatch, resolution and SMD management.

use strata_engine::EngineError;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("no ready engine available")]
    NoReadyEngine,

    #[error("invalid device identifier {0:?}: expected a uuid or a VMD backing device address")]
    InvalidDeviceId(String),

    #[error("no devices found matching: {}", .0.join(", "))]
    DevicesNotFound(Vec<String>),

    #[error("device {0} has no transport address")]
    NoTransportAddress(Uuid),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
