// Record engine shared by the in-memory and file-backed stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::StoreError;
use crate::model::{
    Entity, EntityKind, EntityPatch, EntityState, Phase, PhaseApproval, StateChange,
    WorkspaceSnapshot,
};

/// All persisted records, keyed by workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecords {
    next_internal_id: i64,
    #[serde(default)]
    workspaces: BTreeMap<String, WorkspaceRecords>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct WorkspaceRecords {
    #[serde(default)]
    capabilities: BTreeMap<String, Entity>,
    #[serde(default)]
    enablers: BTreeMap<String, Entity>,
    #[serde(default)]
    story_cards: BTreeMap<String, Entity>,
    #[serde(default)]
    phase_approvals: Vec<PhaseApproval>,
    #[serde(default)]
    history: Vec<StateChange>,
}

impl WorkspaceRecords {
    fn table(&self, kind: EntityKind) -> &BTreeMap<String, Entity> {
        match kind {
            EntityKind::Capability => &self.capabilities,
            EntityKind::Enabler => &self.enablers,
            EntityKind::StoryCard => &self.story_cards,
        }
    }

    fn table_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<String, Entity> {
        match kind {
            EntityKind::Capability => &mut self.capabilities,
            EntityKind::Enabler => &mut self.enablers,
            EntityKind::StoryCard => &mut self.story_cards,
        }
    }

    fn has_capability(&self, internal_id: i64) -> bool {
        self.capabilities
            .values()
            .any(|cap| cap.internal_id == internal_id)
    }

    fn phase_mut(&mut self, workspace_id: &str, phase: Phase) -> &mut PhaseApproval {
        let index = match self.phase_approvals.iter().position(|a| a.phase == phase) {
            Some(index) => index,
            None => {
                self.phase_approvals.push(PhaseApproval {
                    workspace_id: workspace_id.to_string(),
                    phase,
                    approved: false,
                    approved_at: None,
                });
                self.phase_approvals.len() - 1
            }
        };
        &mut self.phase_approvals[index]
    }
}

impl Default for StoreRecords {
    fn default() -> Self {
        Self {
            next_internal_id: 1,
            workspaces: BTreeMap::new(),
        }
    }
}

impl StoreRecords {
    pub fn fetch(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
    ) -> Result<Entity, StoreError> {
        self.workspaces
            .get(workspace_id)
            .and_then(|ws| ws.table(kind).get(business_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                business_id: business_id.to_string(),
            })
    }

    /// Create-or-overwrite when `patch.version` is `None`, compare-and-swap otherwise
    pub fn upsert(&mut self, patch: &EntityPatch, now: DateTime<Utc>) -> Result<Entity, StoreError> {
        let kind = patch.entity_kind();
        if patch.business_id.trim().is_empty() {
            return Err(StoreError::InvalidState(
                "business id must not be empty".to_string(),
            ));
        }

        let parent = patch.parent_capability_internal_id();
        if let Some(parent_id) = parent {
            let exists = self
                .workspaces
                .get(&patch.workspace_id)
                .is_some_and(|ws| ws.has_capability(parent_id));
            if !exists {
                return Err(StoreError::ForeignKey(format!(
                    "no capability with internal id {parent_id} in workspace {}",
                    patch.workspace_id
                )));
            }
        }

        let next_id = self.next_internal_id;
        let workspace = self
            .workspaces
            .entry(patch.workspace_id.clone())
            .or_default();
        let existing = workspace.table(kind).get(&patch.business_id).cloned();

        let (entity, changes) = match existing {
            Some(existing) => {
                if let Some(expected) = patch.version {
                    if expected != existing.version {
                        return Err(StoreError::OptimisticLock {
                            expected,
                            actual: existing.version,
                        });
                    }
                }

                let mut updated = existing.clone();
                updated.state = patch.state.apply(&existing.state);
                updated
                    .state
                    .check_invariants()
                    .map_err(|e| StoreError::InvalidState(e.to_string()))?;
                if let Some(name) = patch.content.name() {
                    updated.name = name.to_string();
                }
                if let Some(description) = patch.content.description() {
                    updated.description = description.to_string();
                }
                if let Some(file_path) = patch.content.file_path() {
                    updated.file_path = Some(file_path.to_string());
                }
                if parent.is_some() {
                    updated.parent_capability_internal_id = parent;
                }
                updated.version = existing.version + 1;
                updated.updated_at = now;

                let changes = diff_entities(&existing, &updated, now);
                (updated, changes)
            }
            None => {
                if patch.version.is_some() {
                    return Err(StoreError::NotFound {
                        kind,
                        business_id: patch.business_id.clone(),
                    });
                }
                if kind == EntityKind::Enabler && parent.is_none() {
                    return Err(StoreError::ForeignKey(format!(
                        "enabler {} cannot be created without a parent capability",
                        patch.business_id
                    )));
                }

                let state = patch.state.apply(&EntityState::default());
                state
                    .check_invariants()
                    .map_err(|e| StoreError::InvalidState(e.to_string()))?;

                let created = Entity {
                    business_id: patch.business_id.clone(),
                    internal_id: next_id,
                    workspace_id: patch.workspace_id.clone(),
                    kind,
                    name: patch
                        .content
                        .name()
                        .unwrap_or(&patch.business_id)
                        .to_string(),
                    description: patch.content.description().unwrap_or_default().to_string(),
                    state,
                    version: 1,
                    updated_at: now,
                    file_path: patch.content.file_path().map(str::to_string),
                    parent_capability_internal_id: parent,
                };
                self.next_internal_id += 1;

                let changes = vec![StateChange {
                    kind,
                    business_id: created.business_id.clone(),
                    field: "created".to_string(),
                    old_value: String::new(),
                    new_value: describe_state(&created.state),
                    version: created.version,
                    changed_at: now,
                }];
                (created, changes)
            }
        };

        workspace
            .table_mut(kind)
            .insert(entity.business_id.clone(), entity.clone());
        workspace.history.extend(changes);
        Ok(entity)
    }

    pub fn snapshot(&self, workspace_id: &str) -> WorkspaceSnapshot {
        let Some(ws) = self.workspaces.get(workspace_id) else {
            return WorkspaceSnapshot::default();
        };
        WorkspaceSnapshot {
            capabilities: ws.capabilities.values().cloned().collect(),
            enablers: ws.enablers.values().cloned().collect(),
            story_cards: ws.story_cards.values().cloned().collect(),
            phase_approvals: ws.phase_approvals.clone(),
        }
    }

    /// Idempotent: an already approved phase is returned untouched
    pub fn approve_phase(
        &mut self,
        workspace_id: &str,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> PhaseApproval {
        let record = self
            .workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .phase_mut(workspace_id, phase);
        if !record.approved {
            record.approved = true;
            record.approved_at = Some(now);
        }
        record.clone()
    }

    pub fn revoke_phase(&mut self, workspace_id: &str, phase: Phase) -> PhaseApproval {
        let record = self
            .workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .phase_mut(workspace_id, phase);
        record.approved = false;
        record.approved_at = None;
        record.clone()
    }

    /// Drop the oldest state changes so each workspace keeps at most `keep`
    pub fn prune_history(&mut self, keep: usize) -> usize {
        let mut pruned = 0;
        for ws in self.workspaces.values_mut() {
            let excess = ws.history.len().saturating_sub(keep);
            if excess > 0 {
                ws.history.drain(..excess);
                pruned += excess;
            }
        }
        pruned
    }

    /// Newest first
    pub fn history(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
        limit: usize,
    ) -> Vec<StateChange> {
        self.workspaces
            .get(workspace_id)
            .map(|ws| {
                ws.history
                    .iter()
                    .rev()
                    .filter(|c| c.kind == kind && c.business_id == business_id)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn describe_state(state: &EntityState) -> String {
    format!(
        "{}/{}/{}/{}",
        state.lifecycle_state, state.workflow_stage, state.stage_status, state.approval_status
    )
}

fn diff_entities(old: &Entity, new: &Entity, now: DateTime<Utc>) -> Vec<StateChange> {
    let fields: [(&str, String, String); 8] = [
        (
            "lifecycle_state",
            old.state.lifecycle_state.to_string(),
            new.state.lifecycle_state.to_string(),
        ),
        (
            "workflow_stage",
            old.state.workflow_stage.to_string(),
            new.state.workflow_stage.to_string(),
        ),
        (
            "stage_status",
            old.state.stage_status.to_string(),
            new.state.stage_status.to_string(),
        ),
        (
            "approval_status",
            old.state.approval_status.to_string(),
            new.state.approval_status.to_string(),
        ),
        (
            "rejection_comment",
            old.state.rejection_comment.clone().unwrap_or_default(),
            new.state.rejection_comment.clone().unwrap_or_default(),
        ),
        ("name", old.name.clone(), new.name.clone()),
        ("description", old.description.clone(), new.description.clone()),
        (
            "file_path",
            old.file_path.clone().unwrap_or_default(),
            new.file_path.clone().unwrap_or_default(),
        ),
    ];

    fields
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .map(|(field, old_value, new_value)| StateChange {
            kind: new.kind,
            business_id: new.business_id.clone(),
            field: field.to_string(),
            old_value,
            new_value,
            version: new.version,
            changed_at: now,
        })
        .collect()
}
