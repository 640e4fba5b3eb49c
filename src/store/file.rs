use async_trait::async_trait;
use chrono::Utc;
use fd_lock::RwLock;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{StateStore, StoreError, StoreRecords};
use crate::model::{Entity, EntityKind, EntityPatch, Phase, PhaseApproval, StateChange, WorkspaceSnapshot};

/// JSON document store shared between processes.
///
/// Every call takes an `fd-lock` on `<path>.lock` (shared for reads,
/// exclusive for mutations) and reloads the document. Mutations write the
/// result to a temporary file that is renamed over the original.
///
/// The whole document is rewritten on every mutation, so the audit history is
/// trimmed to `history_limit` entries per workspace before each write. The lock file is
/// therefore the one serialization point across CLI invocations.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    history_limit: Option<usize>,
}

impl FileStateStore {
    /// Store with unbounded history
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            history_limit: None,
        }
    }

    pub fn with_history_limit(mut self, history_limit: Option<usize>) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_records<T, F>(&self, mutate: bool, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreRecords) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let history_limit = self.history_limit.filter(|_| mutate);
        let op = move |records: &mut StoreRecords| -> Result<T, StoreError> {
            let result = op(records)?;
            if let Some(keep) = history_limit {
                let pruned = records.prune_history(keep);
                if pruned > 0 {
                    debug!(pruned, keep, "trimmed state change history");
                }
            }
            Ok(result)
        };
        tokio::task::spawn_blocking(move || run_locked(&path, mutate, op))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

fn lock_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

fn run_locked<T, F>(path: &Path, mutate: bool, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut StoreRecords) -> Result<T, StoreError>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(lock_path(path))?;
    let mut lock = RwLock::new(lock_file);

    if mutate {
        let _guard = lock.write()?;
        let mut records = load_records(path)?;
        let result = op(&mut records)?;
        write_records(path, &records)?;
        Ok(result)
    } else {
        let _guard = lock.read()?;
        let mut records = load_records(path)?;
        op(&mut records)
    }
}

fn load_records(path: &Path) -> Result<StoreRecords, StoreError> {
    if !path.exists() {
        debug!(path = %path.display(), "state file missing, starting empty");
        return Ok(StoreRecords::default());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(StoreRecords::default());
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_records(path: &Path, records: &StoreRecords) -> Result<(), StoreError> {
    let serialized = serde_json::to_string_pretty(records)?;

    // Write to temporary file first, then rename (atomic operation)
    let temp_file = format!("{}.tmp", path.display());
    fs::write(&temp_file, serialized)?;
    fs::rename(&temp_file, path)?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn fetch(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
    ) -> Result<Entity, StoreError> {
        let workspace_id = workspace_id.to_string();
        let business_id = business_id.to_string();
        self.with_records(false, move |records| {
            records.fetch(&workspace_id, kind, &business_id)
        })
        .await
    }

    async fn upsert(&self, patch: &EntityPatch) -> Result<Entity, StoreError> {
        let patch = patch.clone();
        let entity = self
            .with_records(true, move |records| records.upsert(&patch, Utc::now()))
            .await?;
        debug!(
            kind = %entity.kind,
            business_id = %entity.business_id,
            version = entity.version,
            path = %self.path.display(),
            "file store upsert"
        );
        Ok(entity)
    }

    async fn fetch_workspace_snapshot(
        &self,
        workspace_id: &str,
    ) -> Result<WorkspaceSnapshot, StoreError> {
        let workspace_id = workspace_id.to_string();
        self.with_records(false, move |records| Ok(records.snapshot(&workspace_id)))
            .await
    }

    async fn approve_phase(
        &self,
        workspace_id: &str,
        phase: Phase,
    ) -> Result<PhaseApproval, StoreError> {
        let workspace_id = workspace_id.to_string();
        let record = self
            .with_records(true, move |records| {
                Ok(records.approve_phase(&workspace_id, phase, Utc::now()))
            })
            .await?;
        info!(phase = %phase, approved_at = ?record.approved_at, "phase approval persisted");
        Ok(record)
    }

    async fn revoke_phase(
        &self,
        workspace_id: &str,
        phase: Phase,
    ) -> Result<PhaseApproval, StoreError> {
        let workspace_id = workspace_id.to_string();
        let record = self
            .with_records(true, move |records| {
                Ok(records.revoke_phase(&workspace_id, phase))
            })
            .await?;
        info!(phase = %phase, "phase approval revoked");
        Ok(record)
    }

    async fn state_history(
        &self,
        workspace_id: &str,
        kind: EntityKind,
        business_id: &str,
        limit: usize,
    ) -> Result<Vec<StateChange>, StoreError> {
        let workspace_id = workspace_id.to_string();
        let business_id = business_id.to_string();
        self.with_records(false, move |records| {
            Ok(records.history(&workspace_id, kind, &business_id, limit))
        })
        .await
    }
}
