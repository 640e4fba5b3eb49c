// Partial updates sent to the store

use super::types::{
    ApprovalStatus, EntityKind, EntityState, LifecycleState, StageStatus, WorkflowStage,
};

/// What to do with the rejection comment when a patch is applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommentChange {
    #[default]
    Keep,
    Clear,
    Set(String),
}

/// State dimensions to change. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub lifecycle_state: Option<LifecycleState>,
    pub workflow_stage: Option<WorkflowStage>,
    pub stage_status: Option<StageStatus>,
    pub approval_status: Option<ApprovalStatus>,
    pub rejection_comment: CommentChange,
}

impl StatePatch {
    /// Patch that overwrites every dimension with `state`
    pub fn full(state: &EntityState) -> Self {
        Self {
            lifecycle_state: Some(state.lifecycle_state),
            workflow_stage: Some(state.workflow_stage),
            stage_status: Some(state.stage_status),
            approval_status: Some(state.approval_status),
            rejection_comment: match &state.rejection_comment {
                Some(comment) => CommentChange::Set(comment.clone()),
                None => CommentChange::Clear,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lifecycle_state.is_none()
            && self.workflow_stage.is_none()
            && self.stage_status.is_none()
            && self.approval_status.is_none()
            && self.rejection_comment == CommentChange::Keep
    }

    pub fn apply(&self, current: &EntityState) -> EntityState {
        EntityState {
            lifecycle_state: self.lifecycle_state.unwrap_or(current.lifecycle_state),
            workflow_stage: self.workflow_stage.unwrap_or(current.workflow_stage),
            stage_status: self.stage_status.unwrap_or(current.stage_status),
            approval_status: self.approval_status.unwrap_or(current.approval_status),
            rejection_comment: match &self.rejection_comment {
                CommentChange::Keep => current.rejection_comment.clone(),
                CommentChange::Clear => None,
                CommentChange::Set(comment) => Some(comment.clone()),
            },
        }
    }
}

/// Descriptive fields. Empty strings count as "not provided".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub file_path: Option<String>,
}

impl ContentPatch {
    pub fn is_empty(&self) -> bool {
        self.name().is_none() && self.description().is_none() && self.file_path().is_none()
    }

    pub fn name(&self) -> Option<&str> {
        non_blank(&self.name)
    }

    pub fn description(&self) -> Option<&str> {
        non_blank(&self.description)
    }

    pub fn file_path(&self) -> Option<&str> {
        non_blank(&self.file_path)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Kind-specific part of a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindPatch {
    Capability,
    Enabler {
        parent_capability_internal_id: Option<i64>,
    },
    StoryCard,
}

impl KindPatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            KindPatch::Capability => EntityKind::Capability,
            KindPatch::Enabler { .. } => EntityKind::Enabler,
            KindPatch::StoryCard => EntityKind::StoryCard,
        }
    }
}

/// A single upsert. `version` is the optimistic-lock expectation; when it is
/// `None` the store treats the write as create-or-overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPatch {
    pub workspace_id: String,
    pub business_id: String,
    pub kind: KindPatch,
    pub content: ContentPatch,
    pub state: StatePatch,
    pub version: Option<u64>,
}

impl EntityPatch {
    pub fn new(
        workspace_id: impl Into<String>,
        kind: EntityKind,
        business_id: impl Into<String>,
    ) -> Self {
        let kind = match kind {
            EntityKind::Capability => KindPatch::Capability,
            EntityKind::Enabler => KindPatch::Enabler {
                parent_capability_internal_id: None,
            },
            EntityKind::StoryCard => KindPatch::StoryCard,
        };
        Self {
            workspace_id: workspace_id.into(),
            business_id: business_id.into(),
            kind,
            content: ContentPatch::default(),
            state: StatePatch::default(),
            version: None,
        }
    }

    pub fn with_state(mut self, state: StatePatch) -> Self {
        self.state = state;
        self
    }

    pub fn with_content(mut self, content: ContentPatch) -> Self {
        self.content = content;
        self
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    /// No-op for anything but enablers
    pub fn with_parent(mut self, parent_internal_id: Option<i64>) -> Self {
        if let KindPatch::Enabler {
            parent_capability_internal_id,
        } = &mut self.kind
        {
            *parent_capability_internal_id = parent_internal_id;
        }
        self
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.kind.kind()
    }

    pub fn parent_capability_internal_id(&self) -> Option<i64> {
        match self.kind {
            KindPatch::Enabler {
                parent_capability_internal_id,
            } => parent_capability_internal_id,
            _ => None,
        }
    }
}
