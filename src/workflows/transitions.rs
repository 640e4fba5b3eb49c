// State transition rules. Pure: no I/O, no clock, no cache.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::model::{
    ApprovalStatus, CommentChange, EntityState, LifecycleState, Phase, StageStatus, StatePatch,
};

/// The only ways entity state may change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Approve { phase: Phase },
    Reject { phase: Phase, comment: String },
    Reset,
}

impl Action {
    pub fn approve(phase: Phase) -> Self {
        Action::Approve { phase }
    }

    pub fn reject(phase: Phase, comment: impl Into<String>) -> Self {
        Action::Reject {
            phase,
            comment: comment.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Approve { .. } => "approve",
            Action::Reject { .. } => "reject",
            Action::Reset => "reset",
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Action::Approve { phase } | Action::Reject { phase, .. } => Some(*phase),
            Action::Reset => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        next_state(self).map(|_| ())
    }
}

/// Patch an action produces, independent of the entity it is applied to.
///
/// Reject requires a non-blank comment, stored trimmed. Reset leaves
/// `lifecycle_state` and `workflow_stage` untouched.
pub fn next_state(action: &Action) -> Result<StatePatch, ValidationError> {
    match action {
        Action::Approve { phase } => Ok(StatePatch {
            lifecycle_state: Some(LifecycleState::Active),
            workflow_stage: Some(*phase),
            stage_status: Some(StageStatus::Approved),
            approval_status: Some(ApprovalStatus::Approved),
            rejection_comment: CommentChange::Clear,
        }),
        Action::Reject { phase, comment } => {
            let comment = comment.trim();
            if comment.is_empty() {
                return Err(ValidationError::MissingRejectionComment);
            }
            Ok(StatePatch {
                lifecycle_state: Some(LifecycleState::Active),
                workflow_stage: Some(*phase),
                stage_status: Some(StageStatus::Blocked),
                approval_status: Some(ApprovalStatus::Rejected),
                rejection_comment: CommentChange::Set(comment.to_string()),
            })
        }
        Action::Reset => Ok(StatePatch {
            lifecycle_state: None,
            workflow_stage: None,
            stage_status: Some(StageStatus::InProgress),
            approval_status: Some(ApprovalStatus::Pending),
            rejection_comment: CommentChange::Clear,
        }),
    }
}

/// Full state after applying `action` to `current`
pub fn resulting_state(current: &EntityState, action: &Action) -> Result<EntityState, ValidationError> {
    Ok(next_state(action)?.apply(current))
}
