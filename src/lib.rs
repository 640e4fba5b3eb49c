// phasegate library - approval workflow engine for specification artifacts
// This exposes the core components for the CLI, testing and integration

pub mod cache;
pub mod config;
pub mod documents;
pub mod errors;
pub mod model;
pub mod observability;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod transfer;
pub mod workflows;

// Re-export key types for easy access
pub use cache::EntityCache;
pub use config::{PhaseRequirements, PhasegateConfig};
pub use documents::{DocumentIndex, DocumentSeed, DocumentSource, ManifestDocumentSource};
pub use errors::{ApprovalError, ValidationError};
pub use model::{
    ApprovalStatus, ContentPatch, Entity, EntityKind, EntityPatch, EntityState, LifecycleState,
    Phase, PhaseApproval, StageStatus, StateChange, StatePatch, WorkspaceSnapshot,
};
pub use observability::{OperationTimer, SyncMetrics, SyncStats};
pub use service::{ConflictInfo, ReconcileReport, WorkspaceService};
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreError};
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use transfer::{export_workspace, import_workspace, ImportSummary, WorkspaceExport};
pub use workflows::{
    guarded_update, Action, BulkItem, BulkOutcome, OptimisticOverlay, PhaseProgress, PhaseScope,
};
