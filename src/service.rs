// Workspace service: the per-workspace handle callers hold

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::cache::EntityCache;
use crate::config::PhaseRequirements;
use crate::documents::{DocumentIndex, DocumentSeed, DocumentSource};
use crate::errors::{ApprovalError, ValidationError};
use crate::model::{
    ContentPatch, Entity, EntityKind, EntityState, Phase, PhaseApproval, StateChange,
    WorkspaceSnapshot,
};
use crate::observability::SyncMetrics;
use crate::store::StateStore;
use crate::workflows::{
    Action, BulkCoordinator, BulkItem, BulkOutcome, ItemSync, OptimisticOverlay, ParentRef,
    PhaseAggregator, PhaseProgress, PhaseScope, SyncIntent, SyncOrchestrator, SyncRequest,
};

/// Last optimistic-lock conflict seen by this service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    pub kind: EntityKind,
    pub business_id: String,
    pub expected_version: u64,
    pub actual_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub kind: EntityKind,
    pub business_id: String,
    pub reason: String,
}

/// Outcome of seeding the store from documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: Vec<ReconcileFailure>,
    /// Cached entities with no registered document
    pub orphaned: Vec<(EntityKind, String)>,
}

/// Explicit service instance for one workspace. Owns the cache and document
/// index; construct one per session and pass it by reference.
pub struct WorkspaceService {
    workspace_id: String,
    store: Arc<dyn StateStore>,
    cache: EntityCache,
    orchestrator: SyncOrchestrator,
    aggregator: PhaseAggregator,
    documents: RwLock<DocumentIndex>,
    requirements: PhaseRequirements,
    metrics: Arc<SyncMetrics>,
    last_conflict: Mutex<Option<ConflictInfo>>,
}

impl WorkspaceService {
    pub fn new(workspace_id: impl Into<String>, store: Arc<dyn StateStore>) -> Self {
        let workspace_id = workspace_id.into();
        let metrics = Arc::new(SyncMetrics::new());
        let cache = EntityCache::new(metrics.clone());
        let orchestrator =
            SyncOrchestrator::new(&workspace_id, store.clone(), cache.clone(), metrics.clone());
        let aggregator =
            PhaseAggregator::new(&workspace_id, store.clone(), cache.clone(), metrics.clone());
        Self {
            workspace_id,
            store,
            cache,
            orchestrator,
            aggregator,
            documents: RwLock::new(DocumentIndex::new()),
            requirements: PhaseRequirements::default(),
            metrics,
            last_conflict: Mutex::new(None),
        }
    }

    pub fn with_requirements(mut self, requirements: PhaseRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub(crate) fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn requirements(&self) -> &PhaseRequirements {
        &self.requirements
    }

    /// Refresh the cache from the store and return its contents
    pub async fn fetch_workspace_state(&self) -> Result<WorkspaceSnapshot, ApprovalError> {
        self.metrics.record_store_call();
        let snapshot = self
            .store
            .fetch_workspace_snapshot(&self.workspace_id)
            .await
            .map_err(|e| {
                self.metrics.record_store_error();
                ApprovalError::from_store_operation("fetch workspace snapshot", e)
            })?;
        self.cache.replace_all(&snapshot).await;
        Ok(self.cache.snapshot())
    }

    /// Cache contents without touching the store
    pub fn cached_state(&self) -> WorkspaceSnapshot {
        self.cache.snapshot()
    }

    pub async fn approve_item(
        &self,
        kind: EntityKind,
        business_id: &str,
        phase: Phase,
    ) -> Result<Entity, ApprovalError> {
        self.apply_action(kind, business_id, Action::approve(phase)).await
    }

    pub async fn reject_item(
        &self,
        kind: EntityKind,
        business_id: &str,
        phase: Phase,
        comment: &str,
    ) -> Result<Entity, ApprovalError> {
        self.apply_action(kind, business_id, Action::reject(phase, comment))
            .await
    }

    pub async fn reset_item(&self, kind: EntityKind, business_id: &str) -> Result<Entity, ApprovalError> {
        self.apply_action(kind, business_id, Action::Reset).await
    }

    pub async fn apply_action(
        &self,
        kind: EntityKind,
        business_id: &str,
        action: Action,
    ) -> Result<Entity, ApprovalError> {
        self.run_sync(kind, business_id, SyncIntent::Transition(action))
            .await
    }

    /// Edit descriptive fields under optimistic locking; state is untouched
    pub async fn edit_content(
        &self,
        kind: EntityKind,
        business_id: &str,
        content: ContentPatch,
    ) -> Result<Entity, ApprovalError> {
        if content.is_empty() {
            return Err(ValidationError::EmptyChange.into());
        }
        if !self.cache.contains(kind, business_id) {
            return Err(ApprovalError::NotFound {
                kind,
                business_id: business_id.to_string(),
            });
        }
        self.run_sync(kind, business_id, SyncIntent::Content(content))
            .await
    }

    async fn run_sync(
        &self,
        kind: EntityKind,
        business_id: &str,
        intent: SyncIntent,
    ) -> Result<Entity, ApprovalError> {
        let request = self.build_request(kind, business_id, intent).await;
        let result = self.orchestrator.sync(&request).await;
        if let Err(ApprovalError::StaleState {
            kind,
            business_id,
            expected_version,
            actual_version,
        }) = &result
        {
            *self.last_conflict.lock().await = Some(ConflictInfo {
                kind: *kind,
                business_id: business_id.clone(),
                expected_version: *expected_version,
                actual_version: *actual_version,
            });
        }
        result
    }

    /// Attach the document seed and, for enablers, the parent reference
    async fn build_request(
        &self,
        kind: EntityKind,
        business_id: &str,
        intent: SyncIntent,
    ) -> SyncRequest {
        let documents = self.documents.read().await;
        let seed = documents.get(kind, business_id).cloned();
        let parent = seed
            .as_ref()
            .and_then(|s| s.parent_reference.as_deref())
            .filter(|_| kind == EntityKind::Enabler)
            .map(|parent_id| ParentRef {
                business_id: parent_id.to_string(),
                seed: documents.get(EntityKind::Capability, parent_id).cloned(),
            });
        SyncRequest::new(kind, business_id, intent)
            .with_seed(seed)
            .with_parent(parent)
    }

    /// Add documents to the index without touching the store
    pub async fn register_documents(&self, seeds: &[DocumentSeed]) {
        let mut documents = self.documents.write().await;
        for seed in seeds {
            if !seed.business_id.trim().is_empty() {
                documents.register(seed.clone());
            }
        }
    }

    /// Seed the store from documents: capabilities, then enablers, then story
    /// cards. Missing entities are created with default state, changed
    /// content is written, state is never taken from a document.
    pub async fn reconcile_documents(
        &self,
        seeds: Vec<DocumentSeed>,
    ) -> Result<ReconcileReport, ApprovalError> {
        self.register_documents(&seeds).await;
        self.fetch_workspace_state().await?;

        let mut report = ReconcileReport::default();
        for kind in EntityKind::ALL {
            for seed in seeds.iter().filter(|s| s.kind == kind) {
                let business_id = seed.business_id.trim();
                if business_id.is_empty() {
                    report.failed.push(ReconcileFailure {
                        kind,
                        business_id: seed.business_id.clone(),
                        reason: ValidationError::MissingBusinessId.to_string(),
                    });
                    continue;
                }

                let parent_internal_id = match seed.parent_reference.as_deref() {
                    Some(parent) if kind == EntityKind::Enabler => self
                        .cache
                        .get(EntityKind::Capability, parent.trim())
                        .await
                        .map(|capability| capability.internal_id),
                    _ => None,
                };
                let (intent, created) = match self.cache.get(kind, business_id).await {
                    Some(existing) if !seed.differs_from(&existing, parent_internal_id) => {
                        report.unchanged += 1;
                        continue;
                    }
                    Some(_) => (SyncIntent::Content(seed.content()), false),
                    None => (SyncIntent::Seed, true),
                };

                match self.run_sync(kind, business_id, intent).await {
                    Ok(_) if created => report.created += 1,
                    Ok(_) => report.updated += 1,
                    Err(err) => {
                        warn!(kind = %kind, business_id = %business_id, error = %err, "document reconcile failed");
                        report.failed.push(ReconcileFailure {
                            kind,
                            business_id: business_id.to_string(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        let documents = self.documents.read().await;
        for kind in EntityKind::ALL {
            for entity in self.cache.entities(kind) {
                if !documents.contains(kind, &entity.business_id) {
                    report.orphaned.push((kind, entity.business_id));
                }
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            orphaned = report.orphaned.len(),
            "documents reconciled"
        );
        Ok(report)
    }

    /// Enumerate a document source and reconcile the result
    pub async fn reconcile_from(&self, source: &dyn DocumentSource) -> anyhow::Result<ReconcileReport> {
        let seeds = source.enumerate().await?;
        Ok(self.reconcile_documents(seeds).await?)
    }

    /// Document deletion: drop the index entry and the cache entry. The
    /// store record is kept.
    pub async fn forget_document(&self, kind: EntityKind, business_id: &str) -> Option<DocumentSeed> {
        let removed = self.documents.write().await.remove(kind, business_id);
        self.cache.invalidate(kind, business_id).await;
        info!(kind = %kind, business_id = %business_id, "document forgotten");
        removed
    }

    /// Scope derived from registered documents, or from the cache when there
    /// are none
    pub async fn phase_scope(&self, phase: Phase) -> PhaseScope {
        let documents = self.documents.read().await;
        PhaseScope::derive(
            phase,
            self.requirements.kinds_for(phase),
            &documents,
            &self.cache,
        )
    }

    pub async fn phase_progress(&self, phase: Phase) -> PhaseProgress {
        PhaseProgress::compute(&self.phase_scope(phase).await)
    }

    pub async fn approve_phase(&self, phase: Phase) -> Result<PhaseApproval, ApprovalError> {
        let scope = self.phase_scope(phase).await;
        self.aggregator.approve_phase(&scope).await
    }

    /// Approve against a scope chosen by the caller
    pub async fn approve_phase_with_scope(
        &self,
        scope: &PhaseScope,
    ) -> Result<PhaseApproval, ApprovalError> {
        self.aggregator.approve_phase(scope).await
    }

    pub async fn revoke_phase(&self, phase: Phase) -> Result<PhaseApproval, ApprovalError> {
        self.aggregator.revoke_phase(phase).await
    }

    pub async fn is_phase_approved(&self, phase: Phase) -> bool {
        self.aggregator.is_phase_approved(phase).await
    }

    /// Phases still blocking downstream work
    pub async fn missing_phase_approvals(&self, phases: &[Phase]) -> Vec<Phase> {
        self.aggregator.missing_approvals(phases).await
    }

    pub async fn bulk_approve(
        &self,
        items: &[BulkItem],
        phase: Phase,
    ) -> Result<BulkOutcome, ApprovalError> {
        let mut overlay = OptimisticOverlay::new();
        self.bulk_apply(items, Action::approve(phase), &mut overlay)
            .await
    }

    /// Bulk run with a caller-owned overlay for optimistic display
    pub async fn bulk_apply(
        &self,
        items: &[BulkItem],
        action: Action,
        overlay: &mut OptimisticOverlay,
    ) -> Result<BulkOutcome, ApprovalError> {
        BulkCoordinator::new(self, self.metrics.clone())
            .run(items, &action, overlay)
            .await
    }

    pub async fn history(
        &self,
        kind: EntityKind,
        business_id: &str,
        limit: usize,
    ) -> Result<Vec<StateChange>, ApprovalError> {
        if business_id.trim().is_empty() {
            return Err(ValidationError::MissingBusinessId.into());
        }
        self.metrics.record_store_call();
        self.store
            .state_history(&self.workspace_id, kind, business_id, limit)
            .await
            .map_err(|e| {
                self.metrics.record_store_error();
                ApprovalError::from_store("history", kind, business_id, e)
            })
    }

    pub async fn last_conflict(&self) -> Option<ConflictInfo> {
        self.last_conflict.lock().await.clone()
    }

    /// Refetch the entity behind the last conflict into the cache and clear
    /// the conflict. No merge is attempted; the caller decides what to do
    /// with the fresh state.
    pub async fn resolve_conflict(&self) -> Result<Option<Entity>, ApprovalError> {
        let Some(conflict) = self.last_conflict.lock().await.take() else {
            return Ok(None);
        };
        self.metrics.record_store_call();
        let entity = self
            .store
            .fetch(&self.workspace_id, conflict.kind, &conflict.business_id)
            .await
            .map_err(|e| {
                self.metrics.record_store_error();
                ApprovalError::from_store("refetch", conflict.kind, &conflict.business_id, e)
            })?;
        info!(
            kind = %entity.kind,
            business_id = %entity.business_id,
            version = entity.version,
            "conflict refetched"
        );
        self.cache.insert_confirmed(entity.clone()).await;
        Ok(Some(entity))
    }

    /// Business ids of the given kind that are cached, as bulk items
    pub fn items_of_kinds(&self, kinds: &[EntityKind]) -> Vec<BulkItem> {
        let mut seen = HashSet::new();
        kinds
            .iter()
            .filter(|kind| seen.insert(**kind))
            .flat_map(|&kind| {
                self.cache
                    .entities(kind)
                    .into_iter()
                    .map(move |e| BulkItem::new(kind, e.business_id))
            })
            .collect()
    }
}

#[async_trait]
impl ItemSync for WorkspaceService {
    async fn sync_item(&self, item: &BulkItem, action: &Action) -> Result<Entity, ApprovalError> {
        self.apply_action(item.kind, &item.business_id, action.clone())
            .await
    }

    async fn cached_state(&self, item: &BulkItem) -> Option<EntityState> {
        self.cache
            .get(item.kind, &item.business_id)
            .await
            .map(|entity| entity.state)
    }

    async fn refresh(&self) -> Result<(), ApprovalError> {
        self.fetch_workspace_state().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApprovalStatus;
    use crate::store::MemoryStateStore;

    fn service() -> WorkspaceService {
        WorkspaceService::new("ws", Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn test_reconcile_creates_then_reports_unchanged() {
        let service = service();
        let seeds = vec![
            DocumentSeed::new(EntityKind::Enabler, "ENB-1", "Ledger").with_parent("CAP-1"),
            DocumentSeed::new(EntityKind::Capability, "CAP-1", "Payments"),
        ];

        let first = service.reconcile_documents(seeds.clone()).await.unwrap();
        assert_eq!(first.created, 2);
        assert!(first.failed.is_empty());

        let enabler = service.cache().get(EntityKind::Enabler, "ENB-1").await.unwrap();
        let capability = service.cache().get(EntityKind::Capability, "CAP-1").await.unwrap();
        assert_eq!(enabler.parent_capability_internal_id, Some(capability.internal_id));
        assert_eq!(capability.name, "Payments");

        let second = service.reconcile_documents(seeds).await.unwrap();
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.created, 0);
    }

    #[tokio::test]
    async fn test_reconcile_updates_content_without_touching_state() {
        let service = service();
        service
            .reconcile_documents(vec![DocumentSeed::new(EntityKind::StoryCard, "STORY-1", "Login")])
            .await
            .unwrap();
        service
            .approve_item(EntityKind::StoryCard, "STORY-1", Phase::Intent)
            .await
            .unwrap();

        let report = service
            .reconcile_documents(vec![DocumentSeed::new(EntityKind::StoryCard, "STORY-1", "Sign in")])
            .await
            .unwrap();
        assert_eq!(report.updated, 1);

        let card = service.cache().get(EntityKind::StoryCard, "STORY-1").await.unwrap();
        assert_eq!(card.name, "Sign in");
        assert_eq!(card.state.approval_status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_reconcile_moves_enabler_to_new_parent() {
        let service = service();
        let capabilities = vec![
            DocumentSeed::new(EntityKind::Capability, "CAP-1", "Payments"),
            DocumentSeed::new(EntityKind::Capability, "CAP-2", "Refunds"),
        ];
        let mut seeds = capabilities.clone();
        seeds.push(DocumentSeed::new(EntityKind::Enabler, "ENB-1", "Ledger").with_parent("CAP-1"));
        service.reconcile_documents(seeds).await.unwrap();

        let mut moved = capabilities;
        moved.push(DocumentSeed::new(EntityKind::Enabler, "ENB-1", "Ledger").with_parent("CAP-2"));
        let report = service.reconcile_documents(moved).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 2);

        let enabler = service.cache().get(EntityKind::Enabler, "ENB-1").await.unwrap();
        let cap2 = service.cache().get(EntityKind::Capability, "CAP-2").await.unwrap();
        assert_eq!(enabler.parent_capability_internal_id, Some(cap2.internal_id));
        assert_eq!(enabler.version, 2);

        let stored = service
            .store()
            .fetch("ws", EntityKind::Enabler, "ENB-1")
            .await
            .unwrap();
        assert_eq!(stored.parent_capability_internal_id, Some(cap2.internal_id));
    }

    #[tokio::test]
    async fn test_reconcile_reports_orphans_and_bad_seeds() {
        let service = service();
        service
            .approve_item(EntityKind::Capability, "CAP-9", Phase::Intent)
            .await
            .unwrap();

        let report = service
            .reconcile_documents(vec![DocumentSeed::new(EntityKind::Capability, " ", "blank")])
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.orphaned,
            vec![(EntityKind::Capability, "CAP-9".to_string())]
        );
    }

    #[tokio::test]
    async fn test_forget_document_keeps_store_record() {
        let service = service();
        service
            .reconcile_documents(vec![DocumentSeed::new(EntityKind::Capability, "CAP-1", "Payments")])
            .await
            .unwrap();

        assert!(service.forget_document(EntityKind::Capability, "CAP-1").await.is_some());
        assert!(!service.cache().contains(EntityKind::Capability, "CAP-1"));

        let snapshot = service.fetch_workspace_state().await.unwrap();
        assert_eq!(snapshot.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_edit_content_requires_known_entity() {
        let service = service();
        let content = ContentPatch {
            name: Some("Renamed".to_string()),
            ..ContentPatch::default()
        };
        assert!(matches!(
            service
                .edit_content(EntityKind::Capability, "CAP-404", content.clone())
                .await,
            Err(ApprovalError::NotFound { .. })
        ));
        assert!(matches!(
            service
                .edit_content(EntityKind::Capability, "CAP-404", ContentPatch::default())
                .await,
            Err(ApprovalError::Validation(ValidationError::EmptyChange))
        ));

        service
            .approve_item(EntityKind::Capability, "CAP-1", Phase::Intent)
            .await
            .unwrap();
        let edited = service
            .edit_content(EntityKind::Capability, "CAP-1", content)
            .await
            .unwrap();
        assert_eq!(edited.name, "Renamed");
        assert_eq!(edited.version, 2);
        assert_eq!(edited.state.approval_status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_derived_scope_uses_documents_when_registered() {
        let service = service();
        service
            .register_documents(&[
                DocumentSeed::new(EntityKind::StoryCard, "STORY-1", "Login"),
                DocumentSeed::new(EntityKind::StoryCard, "STORY-2", "Logout"),
            ])
            .await;
        service
            .approve_item(EntityKind::StoryCard, "STORY-1", Phase::Intent)
            .await
            .unwrap();

        let progress = service.phase_progress(Phase::Intent).await;
        assert_eq!(progress.total, 2);
        assert_eq!(progress.approved_count, 1);
        assert_eq!(progress.completion_percentage, 50);
        assert!(matches!(
            service.approve_phase(Phase::Intent).await,
            Err(ApprovalError::PhaseNotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_items_of_kinds_deduplicates_kinds() {
        let service = service();
        service
            .approve_item(EntityKind::Capability, "CAP-1", Phase::Intent)
            .await
            .unwrap();
        let items = service.items_of_kinds(&[EntityKind::Capability, EntityKind::Capability]);
        assert_eq!(items, vec![BulkItem::new(EntityKind::Capability, "CAP-1")]);
    }
}
