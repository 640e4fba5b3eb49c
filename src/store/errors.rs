use thiserror::Error;

use crate::model::EntityKind;

/// Errors a state store can report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {business_id} does not exist")]
    NotFound {
        kind: EntityKind,
        business_id: String,
    },

    #[error("version mismatch: expected {expected}, stored {actual}")]
    OptimisticLock { expected: u64, actual: u64 },

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("store unreachable: {0}")]
    Network(String),

    #[error("rejected invalid state: {0}")]
    InvalidState(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("Serialization error: {err}"))
    }
}
