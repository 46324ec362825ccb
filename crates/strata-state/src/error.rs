//! Error types for the Strata system database.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for system database operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during system database operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("pool {0} already exists")]
    PoolExists(Uuid),

    #[error("pool label {label:?} already in use by pool {owner}")]
    LabelExists { label: String, owner: Uuid },

    #[error("not the system leader (current leader: {})", leader_hint.as_deref().unwrap_or("unknown"))]
    NotLeader { leader_hint: Option<String> },

    #[error("pool lock for {held} does not cover pool {wanted}")]
    LockMismatch { held: Uuid, wanted: Uuid },

    #[error("fault domain error: {0}")]
    FaultDomain(String),
}
