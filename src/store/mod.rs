//! State store client contract
//!
//! The store is the single authority for entity state and the only
//! serialization point for concurrent writers. Callers never write intended
//! values anywhere else; they submit an [`EntityPatch`] and use whatever the
//! store confirms.
//!
//! # Concurrency
//!
//! `upsert` with `version: Some(n)` is a compare-and-swap: it succeeds only if
//! the stored version is still `n` and otherwise fails with
//! [`StoreError::OptimisticLock`]. Implementations must not retry mutating
//! calls on transport failure; a [`StoreError::Network`] is handed straight
//! back to the caller because the mutation may or may not have landed.
//!
//! # Testing with Mocks
//!
//! ```rust
//! #[cfg(test)]
//! mod tests {
//!     use phasegate::store::{MockStateStore, StoreError};
//!
//!     #[tokio::test]
//!     async fn test_network_failure_surfaces() {
//!         let mut store = MockStateStore::new();
//!         store
//!             .expect_upsert()
//!             .times(1)
//!             .returning(|_| Err(StoreError::Network("timeout".into())));
//!     }
//! }
//! ```
pub mod errors;
pub mod file;
pub mod memory;
pub mod records;

use async_trait::async_trait;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::model::{Entity, EntityKind, EntityPatch, Phase, PhaseApproval, StateChange, WorkspaceSnapshot};

pub use errors::StoreError;
pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use records::StoreRecords;

/// Typed access to the backing persistence
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Point fetch of one entity
    async fn fetch(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
    ) -> Result<Entity, StoreError>;

    /// Create-or-overwrite when `patch.version` is absent, compare-and-swap
    /// when present. The returned entity's version is always greater than the
    /// one supplied.
    async fn upsert(&self, patch: &EntityPatch) -> Result<Entity, StoreError>;

    /// All entities and phase approvals for a workspace
    async fn fetch_workspace_snapshot(
        &self,
        workspace_id: &str,
    ) -> Result<WorkspaceSnapshot, StoreError>;

    /// Mark a phase approved. Approving an approved phase returns the stored
    /// record unchanged.
    async fn approve_phase(
        &self,
        workspace_id: &str,
        phase: Phase,
    ) -> Result<PhaseApproval, StoreError>;

    /// Clear a phase approval. Entity records are not touched.
    async fn revoke_phase(
        &self,
        workspace_id: &str,
        phase: Phase,
    ) -> Result<PhaseApproval, StoreError>;

    /// Audit trail for one entity, newest first
    async fn state_history(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
        limit: usize,
    ) -> Result<Vec<StateChange>, StoreError>;
}
