// Core types for the four-dimension approval state model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;

/// Kind tag for the three artifact families that carry approval state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Capability,
    Enabler,
    StoryCard,
}

impl EntityKind {
    /// Parents before children, so iterating in this order respects foreign keys
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Capability,
        EntityKind::Enabler,
        EntityKind::StoryCard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Capability => "capability",
            EntityKind::Enabler => "enabler",
            EntityKind::StoryCard => "story_card",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "capability" | "cap" => Ok(EntityKind::Capability),
            "enabler" | "enb" => Ok(EntityKind::Enabler),
            "story_card" | "storycard" | "story" => Ok(EntityKind::StoryCard),
            _ => Err(ValidationError::UnknownValue {
                field: "kind",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Draft,
    Active,
    Implemented,
    Maintained,
    Retired,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "draft",
            LifecycleState::Active => "active",
            LifecycleState::Implemented => "implemented",
            LifecycleState::Maintained => "maintained",
            LifecycleState::Retired => "retired",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow phase. Doubles as the `workflow_stage` dimension of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intent,
    Specification,
    UiDesign,
    Implementation,
    ControlLoop,
}

pub type WorkflowStage = Phase;

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Intent,
        Phase::Specification,
        Phase::UiDesign,
        Phase::Implementation,
        Phase::ControlLoop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Intent => "intent",
            Phase::Specification => "specification",
            Phase::UiDesign => "ui_design",
            Phase::Implementation => "implementation",
            Phase::ControlLoop => "control_loop",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownValue {
                field: "phase",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    InProgress,
    ReadyForApproval,
    Approved,
    Blocked,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::InProgress => "in_progress",
            StageStatus::ReadyForApproval => "ready_for_approval",
            StageStatus::Approved => "approved",
            StageStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four state dimensions plus the rejection note that travels with them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub lifecycle_state: LifecycleState,
    pub workflow_stage: WorkflowStage,
    pub stage_status: StageStatus,
    pub approval_status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_comment: Option<String>,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            lifecycle_state: LifecycleState::Draft,
            workflow_stage: Phase::Intent,
            stage_status: StageStatus::InProgress,
            approval_status: ApprovalStatus::Pending,
            rejection_comment: None,
        }
    }
}

impl EntityState {
    /// approved => stage approved; rejected => stage blocked with a comment
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        match self.approval_status {
            ApprovalStatus::Approved if self.stage_status != StageStatus::Approved => {
                Err(ValidationError::InvalidState(format!(
                    "approval_status approved requires stage_status approved, found {}",
                    self.stage_status
                )))
            }
            ApprovalStatus::Rejected if self.stage_status != StageStatus::Blocked => {
                Err(ValidationError::InvalidState(format!(
                    "approval_status rejected requires stage_status blocked, found {}",
                    self.stage_status
                )))
            }
            ApprovalStatus::Rejected
                if self
                    .rejection_comment
                    .as_deref()
                    .map_or(true, |c| c.trim().is_empty()) =>
            {
                Err(ValidationError::MissingRejectionComment)
            }
            _ => Ok(()),
        }
    }
}

/// A capability, enabler or story card as confirmed by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub business_id: String,
    pub internal_id: i64,
    pub workspace_id: String,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub state: EntityState,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Only ever set on enablers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_capability_internal_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseApproval {
    pub workspace_id: String,
    pub phase: Phase,
    pub approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Everything the store knows about one workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    #[serde(default)]
    pub capabilities: Vec<Entity>,
    #[serde(default)]
    pub enablers: Vec<Entity>,
    #[serde(default)]
    pub story_cards: Vec<Entity>,
    #[serde(default)]
    pub phase_approvals: Vec<PhaseApproval>,
}

impl WorkspaceSnapshot {
    pub fn entities(&self, kind: EntityKind) -> &[Entity] {
        match kind {
            EntityKind::Capability => &self.capabilities,
            EntityKind::Enabler => &self.enablers,
            EntityKind::StoryCard => &self.story_cards,
        }
    }

    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.capabilities
            .iter()
            .chain(self.enablers.iter())
            .chain(self.story_cards.iter())
    }

    pub fn phase_approval(&self, phase: Phase) -> Option<&PhaseApproval> {
        self.phase_approvals.iter().find(|a| a.phase == phase)
    }

    pub fn entity_count(&self) -> usize {
        self.capabilities.len() + self.enablers.len() + self.story_cards.len()
    }
}

/// One audit entry; a single upsert may produce several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub kind: EntityKind,
    pub business_id: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub version: u64,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_fresh_draft() {
        let state = EntityState::default();
        assert_eq!(state.lifecycle_state, LifecycleState::Draft);
        assert_eq!(state.workflow_stage, Phase::Intent);
        assert_eq!(state.stage_status, StageStatus::InProgress);
        assert_eq!(state.approval_status, ApprovalStatus::Pending);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_approved_requires_approved_stage() {
        let state = EntityState {
            approval_status: ApprovalStatus::Approved,
            stage_status: StageStatus::InProgress,
            ..EntityState::default()
        };
        assert!(matches!(
            state.check_invariants(),
            Err(ValidationError::InvalidState(_))
        ));
    }

    #[test]
    fn test_rejected_requires_blocked_and_comment() {
        let mut state = EntityState {
            approval_status: ApprovalStatus::Rejected,
            stage_status: StageStatus::Blocked,
            rejection_comment: Some("   ".to_string()),
            ..EntityState::default()
        };
        assert_eq!(
            state.check_invariants(),
            Err(ValidationError::MissingRejectionComment)
        );

        state.rejection_comment = Some("missing acceptance criteria".to_string());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_phase_and_kind_parsing() {
        assert_eq!("ui-design".parse::<Phase>().unwrap(), Phase::UiDesign);
        assert_eq!("control_loop".parse::<Phase>().unwrap(), Phase::ControlLoop);
        assert_eq!("story-card".parse::<EntityKind>().unwrap(), EntityKind::StoryCard);
        assert!("nonsense".parse::<Phase>().is_err());
    }

    #[test]
    fn test_entity_serializes_flat_state() {
        let entity = Entity {
            business_id: "CAP-000123".to_string(),
            internal_id: 7,
            workspace_id: "ws".to_string(),
            kind: EntityKind::Capability,
            name: "Checkout".to_string(),
            description: String::new(),
            state: EntityState::default(),
            version: 1,
            updated_at: Utc::now(),
            file_path: None,
            parent_capability_internal_id: None,
        };

        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["lifecycle_state"], "draft");
        assert_eq!(json["workflow_stage"], "intent");
        assert_eq!(json["kind"], "capability");
        assert!(json.get("parent_capability_internal_id").is_none());

        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
    }
}
