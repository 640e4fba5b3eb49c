// Workspace export and import

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::errors::{ApprovalError, ValidationError};
use crate::model::{
    ContentPatch, Entity, EntityPatch, Phase, PhaseApproval, StateChange, StatePatch,
};
use crate::service::WorkspaceService;

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceExport {
    pub format_version: String,
    pub exported_at: DateTime<Utc>,
    pub exported_from: String,
    pub workspace_id: String,
    #[serde(default)]
    pub capabilities: Vec<Entity>,
    #[serde(default)]
    pub enablers: Vec<Entity>,
    #[serde(default)]
    pub story_cards: Vec<Entity>,
    #[serde(default)]
    pub phase_approvals: Vec<PhaseApproval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_changes: Option<Vec<StateChange>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub capabilities: usize,
    pub enablers: usize,
    pub story_cards: usize,
    pub phases_restored: Vec<Phase>,
    pub skipped: Vec<String>,
}

impl ImportSummary {
    pub fn entity_count(&self) -> usize {
        self.capabilities + self.enablers + self.story_cards
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Snapshot the workspace, optionally with each entity's full history
pub async fn export_workspace(
    service: &WorkspaceService,
    include_history: bool,
) -> Result<WorkspaceExport, ApprovalError> {
    let snapshot = service.fetch_workspace_state().await?;

    let state_changes = if include_history {
        let mut changes = Vec::new();
        for entity in snapshot.all_entities() {
            changes.extend(
                service
                    .history(entity.kind, &entity.business_id, usize::MAX)
                    .await?,
            );
        }
        changes.sort_by_key(|c| c.changed_at);
        Some(changes)
    } else {
        None
    };

    info!(
        workspace_id = %service.workspace_id(),
        entities = snapshot.entity_count(),
        include_history,
        "workspace exported"
    );

    Ok(WorkspaceExport {
        format_version: EXPORT_FORMAT_VERSION.to_string(),
        exported_at: Utc::now(),
        exported_from: local_hostname(),
        workspace_id: service.workspace_id().to_string(),
        capabilities: snapshot.capabilities,
        enablers: snapshot.enablers,
        story_cards: snapshot.story_cards,
        phase_approvals: snapshot.phase_approvals,
        state_changes,
    })
}

/// Replay an export into the service's workspace.
///
/// Capabilities go first so enabler parents can be remapped to the new
/// internal ids. An approved phase is restored only if the imported entities
/// qualify for it. Network failures abort; other per-item failures are
/// listed in `skipped`.
pub async fn import_workspace(
    service: &WorkspaceService,
    export: &WorkspaceExport,
) -> Result<ImportSummary, ApprovalError> {
    if export.format_version != EXPORT_FORMAT_VERSION {
        return Err(ValidationError::UnknownValue {
            field: "format_version",
            value: export.format_version.clone(),
        }
        .into());
    }

    let mut summary = ImportSummary::default();
    let exported_parents: HashMap<i64, &str> = export
        .capabilities
        .iter()
        .map(|c| (c.internal_id, c.business_id.as_str()))
        .collect();
    let mut new_ids: HashMap<String, i64> = HashMap::new();

    for capability in &export.capabilities {
        if let Some(entity) = restore(service, capability, None, &mut summary).await? {
            new_ids.insert(entity.business_id.clone(), entity.internal_id);
            summary.capabilities += 1;
        }
    }

    for enabler in &export.enablers {
        let parent = enabler
            .parent_capability_internal_id
            .and_then(|old| exported_parents.get(&old))
            .and_then(|business_id| new_ids.get(*business_id))
            .copied();
        if parent.is_none() {
            summary.skipped.push(format!(
                "enabler {}: parent capability not present in export",
                enabler.business_id
            ));
            continue;
        }
        if restore(service, enabler, parent, &mut summary).await?.is_some() {
            summary.enablers += 1;
        }
    }

    for story_card in &export.story_cards {
        if restore(service, story_card, None, &mut summary).await?.is_some() {
            summary.story_cards += 1;
        }
    }

    service.fetch_workspace_state().await?;

    for approval in export.phase_approvals.iter().filter(|a| a.approved) {
        match service.approve_phase(approval.phase).await {
            Ok(_) => summary.phases_restored.push(approval.phase),
            Err(ApprovalError::PhaseNotReady { phase, reason }) => {
                summary
                    .skipped
                    .push(format!("phase {phase}: not restored ({reason})"));
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        workspace_id = %service.workspace_id(),
        entities = summary.entity_count(),
        phases = summary.phases_restored.len(),
        skipped = summary.skipped.len(),
        "workspace imported"
    );
    Ok(summary)
}

async fn restore(
    service: &WorkspaceService,
    entity: &Entity,
    parent: Option<i64>,
    summary: &mut ImportSummary,
) -> Result<Option<Entity>, ApprovalError> {
    let patch = EntityPatch::new(service.workspace_id(), entity.kind, &entity.business_id)
        .with_state(StatePatch::full(&entity.state))
        .with_content(ContentPatch {
            name: Some(entity.name.clone()),
            description: Some(entity.description.clone()),
            file_path: entity.file_path.clone(),
        })
        .with_parent(parent);

    match service.store().upsert(&patch).await {
        Ok(restored) => Ok(Some(restored)),
        Err(err) => {
            let err = ApprovalError::from_store("import", entity.kind, &entity.business_id, err);
            if err.is_network() {
                return Err(err);
            }
            warn!(kind = %entity.kind, business_id = %entity.business_id, error = %err, "import skipped entity");
            summary
                .skipped
                .push(format!("{} {}: {}", entity.kind, entity.business_id, err));
            Ok(None)
        }
    }
}
