// Approval workflow: transition rules, guarded updates, orchestration,
// phase aggregation and bulk operations

pub mod bulk;
pub mod guarded;
pub mod orchestrator;
pub mod phase;
pub mod transitions;

pub use bulk::{BulkCoordinator, BulkFailure, BulkItem, BulkOutcome, ItemSync};
pub use guarded::{guarded_update, OptimisticOverlay};
pub use orchestrator::{ParentRef, SyncIntent, SyncOrchestrator, SyncRequest};
pub use phase::{
    CategoryProgress, PhaseAggregator, PhaseProgress, PhaseScope, ScopeCategory, ScopeItem,
};
pub use transitions::{next_state, resulting_state, Action};
