// Error taxonomy surfaced by the approval workflow

use thiserror::Error;

use crate::model::{EntityKind, Phase};
use crate::store::StoreError;

/// Input problems caught before any I/O happens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("business id must not be empty")]
    MissingBusinessId,

    #[error("a rejection comment is required")]
    MissingRejectionComment,

    #[error("enabler {0} has no parent capability reference")]
    MissingParent(String),

    #[error("unknown {field} value '{value}'")]
    UnknownValue { field: &'static str, value: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("nothing to change")]
    EmptyChange,
}

/// Errors returned by the workflow service and its components
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} {business_id} not found")]
    NotFound {
        kind: EntityKind,
        business_id: String,
    },

    #[error(
        "{kind} {business_id} was changed by someone else (expected version {expected_version}, store has {actual_version}); refresh and retry"
    )]
    StaleState {
        kind: EntityKind,
        business_id: String,
        expected_version: u64,
        actual_version: u64,
    },

    #[error("{kind} {business_id} references capability {parent} which could not be resolved: {reason}")]
    ForeignKey {
        kind: EntityKind,
        business_id: String,
        parent: String,
        reason: String,
    },

    #[error("network failure during {operation}: {reason}")]
    Network { operation: String, reason: String },

    #[error("phase {phase} cannot be approved: {reason}")]
    PhaseNotReady { phase: Phase, reason: String },

    #[error("{operation} failed: {source}")]
    Store {
        operation: String,
        #[source]
        source: StoreError,
    },
}

impl ApprovalError {
    /// Map a store failure for a single entity onto the workflow taxonomy
    pub fn from_store(
        operation: &str,
        kind: EntityKind,
        business_id: &str,
        err: StoreError,
    ) -> Self {
        match err {
            StoreError::NotFound { kind, business_id } => ApprovalError::NotFound { kind, business_id },
            StoreError::OptimisticLock { expected, actual } => ApprovalError::StaleState {
                kind,
                business_id: business_id.to_string(),
                expected_version: expected,
                actual_version: actual,
            },
            StoreError::Network(reason) => ApprovalError::Network {
                operation: operation.to_string(),
                reason,
            },
            StoreError::ForeignKey(reason) => ApprovalError::ForeignKey {
                kind,
                business_id: business_id.to_string(),
                parent: "<unresolved>".to_string(),
                reason,
            },
            StoreError::InvalidState(reason) => {
                ApprovalError::Validation(ValidationError::InvalidState(reason))
            }
            other => ApprovalError::Store {
                operation: operation.to_string(),
                source: other,
            },
        }
    }

    /// Store failure for an operation that is not tied to one entity
    pub fn from_store_operation(operation: &str, err: StoreError) -> Self {
        match err {
            StoreError::Network(reason) => ApprovalError::Network {
                operation: operation.to_string(),
                reason,
            },
            other => ApprovalError::Store {
                operation: operation.to_string(),
                source: other,
            },
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ApprovalError::StaleState { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApprovalError::Network { .. })
    }

    /// Short machine-friendly label, used as a log field
    pub fn category(&self) -> &'static str {
        match self {
            ApprovalError::Validation(_) => "validation",
            ApprovalError::NotFound { .. } => "not_found",
            ApprovalError::StaleState { .. } => "stale_state",
            ApprovalError::ForeignKey { .. } => "foreign_key",
            ApprovalError::Network { .. } => "network",
            ApprovalError::PhaseNotReady { .. } => "phase_not_ready",
            ApprovalError::Store { .. } => "store",
        }
    }
}
