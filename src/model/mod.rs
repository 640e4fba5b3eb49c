pub mod patch;
pub mod types;

pub use patch::{CommentChange, ContentPatch, EntityPatch, KindPatch, StatePatch};
pub use types::{
    ApprovalStatus, Entity, EntityKind, EntityState, LifecycleState, Phase, PhaseApproval,
    StageStatus, StateChange, WorkflowStage, WorkspaceSnapshot,
};
