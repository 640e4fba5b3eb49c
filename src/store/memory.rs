use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{StateStore, StoreError, StoreRecords};
use crate::model::{Entity, EntityKind, EntityPatch, Phase, PhaseApproval, StateChange, WorkspaceSnapshot};

/// In-process store. The mutex is held only for the duration of one record
/// operation, never across a caller's await points.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<StoreRecords>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: StoreRecords) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub async fn records(&self) -> StoreRecords {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn fetch(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
    ) -> Result<Entity, StoreError> {
        self.records.lock().await.fetch(workspace_id, kind, business_id)
    }

    async fn upsert(&self, patch: &EntityPatch) -> Result<Entity, StoreError> {
        let entity = self.records.lock().await.upsert(patch, Utc::now())?;
        debug!(
            kind = %entity.kind,
            business_id = %entity.business_id,
            version = entity.version,
            "memory store upsert"
        );
        Ok(entity)
    }

    async fn fetch_workspace_snapshot(
        &self,
        workspace_id: &str,
    ) -> Result<WorkspaceSnapshot, StoreError> {
        Ok(self.records.lock().await.snapshot(workspace_id))
    }

    async fn approve_phase(
        &self,
        workspace_id: &str,
        phase: Phase,
    ) -> Result<PhaseApproval, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .approve_phase(workspace_id, phase, Utc::now()))
    }

    async fn revoke_phase(
        &self,
        workspace_id: &str,
        phase: Phase,
    ) -> Result<PhaseApproval, StoreError> {
        Ok(self.records.lock().await.revoke_phase(workspace_id, phase))
    }

    async fn state_history(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
        limit: usize,
    ) -> Result<Vec<StateChange>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .history(workspace_id, kind, business_id, limit))
    }
}
