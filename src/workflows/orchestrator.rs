// Sync orchestrator: validate, resolve the parent (one hop), upsert, cache

use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::transitions::{next_state, Action};
use crate::cache::EntityCache;
use crate::documents::DocumentSeed;
use crate::errors::{ApprovalError, ValidationError};
use crate::model::{ContentPatch, Entity, EntityKind, EntityPatch, StatePatch};
use crate::observability::SyncMetrics;
use crate::store::{StateStore, StoreError};
use crate::telemetry::create_sync_span;

/// What a sync is meant to change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncIntent {
    /// Apply a state transition
    Transition(Action),
    /// Create from a document, or refresh its content. State is untouched.
    Seed,
    /// Edit descriptive fields only
    Content(ContentPatch),
}

/// Parent capability an enabler points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub business_id: String,
    /// Used as the capability's content if it has to be created
    pub seed: Option<DocumentSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub kind: EntityKind,
    pub business_id: String,
    pub intent: SyncIntent,
    /// Document content applied when the entity does not exist yet
    pub seed: Option<DocumentSeed>,
    pub parent: Option<ParentRef>,
}

impl SyncRequest {
    pub fn new(kind: EntityKind, business_id: impl Into<String>, intent: SyncIntent) -> Self {
        Self {
            kind,
            business_id: business_id.into(),
            intent,
            seed: None,
            parent: None,
        }
    }

    pub fn transition(kind: EntityKind, business_id: impl Into<String>, action: Action) -> Self {
        Self::new(kind, business_id, SyncIntent::Transition(action))
    }

    pub fn with_seed(mut self, seed: Option<DocumentSeed>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parent(mut self, parent: Option<ParentRef>) -> Self {
        self.parent = parent;
        self
    }

    fn operation(&self) -> &'static str {
        match &self.intent {
            SyncIntent::Transition(action) => action.name(),
            SyncIntent::Seed => "seed",
            SyncIntent::Content(_) => "edit",
        }
    }
}

/// Drives a single entity mutation through the store and into the cache
#[derive(Clone)]
pub struct SyncOrchestrator {
    workspace_id: String,
    store: Arc<dyn StateStore>,
    cache: EntityCache,
    metrics: Arc<SyncMetrics>,
}

impl SyncOrchestrator {
    pub fn new(
        workspace_id: impl Into<String>,
        store: Arc<dyn StateStore>,
        cache: EntityCache,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            store,
            cache,
            metrics,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Run one sync. At most one parent capability is created along the way;
    /// the addressed entity is written exactly once and never retried.
    pub async fn sync(&self, request: &SyncRequest) -> Result<Entity, ApprovalError> {
        let span = create_sync_span(
            request.operation(),
            request.kind.as_str(),
            &request.business_id,
            None,
        );
        self.sync_inner(request).instrument(span).await
    }

    async fn sync_inner(&self, request: &SyncRequest) -> Result<Entity, ApprovalError> {
        let kind = request.kind;
        let business_id = request.business_id.trim();
        if business_id.is_empty() {
            return Err(ValidationError::MissingBusinessId.into());
        }

        let state = match &request.intent {
            SyncIntent::Transition(action) => next_state(action)?,
            SyncIntent::Seed => StatePatch::default(),
            SyncIntent::Content(content) => {
                // an enabler may change only its parent
                let moves_parent = kind == EntityKind::Enabler && request.parent.is_some();
                if content.is_empty() && !moves_parent {
                    return Err(ValidationError::EmptyChange.into());
                }
                StatePatch::default()
            }
        };

        let cached = self.cache.get(kind, business_id).await;

        if kind == EntityKind::Enabler {
            let declared = request
                .parent
                .as_ref()
                .is_some_and(|p| !p.business_id.trim().is_empty());
            let known = cached
                .as_ref()
                .is_some_and(|e| e.parent_capability_internal_id.is_some());
            if !declared && !known {
                return Err(ApprovalError::ForeignKey {
                    kind,
                    business_id: business_id.to_string(),
                    parent: "<none>".to_string(),
                    reason: "enabler declares no parent capability".to_string(),
                });
            }
        }

        let parent_internal_id = match (&request.parent, kind) {
            (Some(parent), EntityKind::Enabler) if !parent.business_id.trim().is_empty() => {
                Some(self.resolve_parent(business_id, parent).await?)
            }
            _ => None,
        };

        let content = match &request.intent {
            SyncIntent::Content(content) => content.clone(),
            SyncIntent::Seed => request
                .seed
                .as_ref()
                .map(DocumentSeed::content)
                .unwrap_or_default(),
            SyncIntent::Transition(_) if cached.is_none() => request
                .seed
                .as_ref()
                .map(DocumentSeed::content)
                .unwrap_or_default(),
            SyncIntent::Transition(_) => ContentPatch::default(),
        };

        let expected_version = cached.as_ref().map(|e| e.version);
        let patch = EntityPatch::new(&self.workspace_id, kind, business_id)
            .with_state(state)
            .with_content(content)
            .with_version(expected_version)
            .with_parent(parent_internal_id);

        self.metrics.record_store_call();
        match self.store.upsert(&patch).await {
            Ok(entity) => {
                info!(
                    kind = %kind,
                    business_id = %business_id,
                    version = entity.version,
                    approval_status = %entity.state.approval_status,
                    "entity synced"
                );
                self.cache.insert_confirmed(entity.clone()).await;
                Ok(entity)
            }
            Err(err) => {
                self.metrics.record_store_error();
                match err {
                    StoreError::OptimisticLock { expected, actual } => {
                        self.metrics.record_conflict(business_id);
                        Err(ApprovalError::StaleState {
                            kind,
                            business_id: business_id.to_string(),
                            expected_version: expected,
                            actual_version: actual,
                        })
                    }
                    StoreError::ForeignKey(reason) => Err(ApprovalError::ForeignKey {
                        kind,
                        business_id: business_id.to_string(),
                        parent: request
                            .parent
                            .as_ref()
                            .map(|p| p.business_id.clone())
                            .unwrap_or_else(|| "<none>".to_string()),
                        reason,
                    }),
                    other => {
                        warn!(kind = %kind, business_id = %business_id, error = %other, "sync failed");
                        Err(ApprovalError::from_store(request.operation(), kind, business_id, other))
                    }
                }
            }
        }
    }

    /// The single resolution hop: cache, then point fetch, then create with
    /// default state. The created capability has no parent of its own, so
    /// nothing further is resolved.
    async fn resolve_parent(&self, child_id: &str, parent: &ParentRef) -> Result<i64, ApprovalError> {
        let parent_id = parent.business_id.trim();
        if let Some(capability) = self.cache.get(EntityKind::Capability, parent_id).await {
            return Ok(capability.internal_id);
        }

        let foreign_key = |reason: String| ApprovalError::ForeignKey {
            kind: EntityKind::Enabler,
            business_id: child_id.to_string(),
            parent: parent_id.to_string(),
            reason,
        };

        self.metrics.record_store_call();
        match self
            .store
            .fetch(&self.workspace_id, EntityKind::Capability, parent_id)
            .await
        {
            Ok(capability) => {
                debug!(parent = %parent_id, internal_id = capability.internal_id, "parent capability fetched");
                let internal_id = capability.internal_id;
                self.cache.insert_confirmed(capability).await;
                return Ok(internal_id);
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(other) => {
                self.metrics.record_store_error();
                return Err(ApprovalError::from_store_operation(
                    &format!("resolve parent {parent_id}"),
                    other,
                ));
            }
        }

        let content = parent
            .seed
            .as_ref()
            .map(DocumentSeed::content)
            .unwrap_or_default();
        let patch = EntityPatch::new(&self.workspace_id, EntityKind::Capability, parent_id)
            .with_content(content);

        self.metrics.record_store_call();
        match self.store.upsert(&patch).await {
            Ok(capability) => {
                self.metrics.record_parent_creation();
                info!(
                    parent = %parent_id,
                    child = %child_id,
                    internal_id = capability.internal_id,
                    version = capability.version,
                    "created missing parent capability"
                );
                let internal_id = capability.internal_id;
                self.cache.insert_confirmed(capability).await;
                Ok(internal_id)
            }
            Err(StoreError::ForeignKey(reason)) => {
                self.metrics.record_store_error();
                Err(foreign_key(reason))
            }
            Err(other) => {
                self.metrics.record_store_error();
                Err(ApprovalError::from_store_operation(
                    &format!("create parent {parent_id}"),
                    other,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApprovalStatus, EntityState, LifecycleState, Phase, StageStatus};
    use crate::store::{MemoryStateStore, MockStateStore};
    use chrono::Utc;

    fn orchestrator(store: Arc<dyn StateStore>) -> (SyncOrchestrator, EntityCache, Arc<SyncMetrics>) {
        let metrics = Arc::new(SyncMetrics::new());
        let cache = EntityCache::new(metrics.clone());
        (
            SyncOrchestrator::new("ws", store, cache.clone(), metrics.clone()),
            cache,
            metrics,
        )
    }

    fn stored(kind: EntityKind, id: &str, version: u64) -> Entity {
        Entity {
            business_id: id.to_string(),
            internal_id: 10,
            workspace_id: "ws".to_string(),
            kind,
            name: id.to_string(),
            description: String::new(),
            state: EntityState::default(),
            version,
            updated_at: Utc::now(),
            file_path: None,
            parent_capability_internal_id: None,
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_store_call() {
        // no expectations: any store call would panic
        let store = MockStateStore::new();
        let (orchestrator, _, metrics) = orchestrator(Arc::new(store));

        let blank = SyncRequest::transition(EntityKind::Capability, "  ", Action::approve(Phase::Intent));
        assert!(matches!(
            orchestrator.sync(&blank).await,
            Err(ApprovalError::Validation(ValidationError::MissingBusinessId))
        ));

        let no_comment = SyncRequest::transition(
            EntityKind::StoryCard,
            "STORY-1",
            Action::reject(Phase::Intent, ""),
        );
        assert!(matches!(
            orchestrator.sync(&no_comment).await,
            Err(ApprovalError::Validation(ValidationError::MissingRejectionComment))
        ));

        let orphan = SyncRequest::transition(EntityKind::Enabler, "ENB-1", Action::approve(Phase::Intent));
        assert!(matches!(
            orchestrator.sync(&orphan).await,
            Err(ApprovalError::ForeignKey { .. })
        ));

        assert_eq!(metrics.get_stats().store_calls, 0);
    }

    #[tokio::test]
    async fn test_network_error_is_not_retried() {
        let mut store = MockStateStore::new();
        store
            .expect_upsert()
            .times(1)
            .returning(|_| Err(StoreError::Network("connection reset".to_string())));
        let (orchestrator, cache, _) = orchestrator(Arc::new(store));

        let request = SyncRequest::transition(EntityKind::Capability, "CAP-1", Action::approve(Phase::Intent));
        let err = orchestrator.sync(&request).await.unwrap_err();
        assert!(err.is_network());
        assert!(!cache.contains(EntityKind::Capability, "CAP-1"));
    }

    #[tokio::test]
    async fn test_conflict_surfaces_as_stale_state_and_keeps_cache() {
        let mut store = MockStateStore::new();
        store
            .expect_upsert()
            .times(1)
            .returning(|_| Err(StoreError::OptimisticLock { expected: 2, actual: 3 }));
        let (orchestrator, cache, metrics) = orchestrator(Arc::new(store));
        cache.insert_confirmed(stored(EntityKind::Capability, "CAP-1", 2)).await;

        let request = SyncRequest::transition(EntityKind::Capability, "CAP-1", Action::approve(Phase::Intent));
        let err = orchestrator.sync(&request).await.unwrap_err();
        assert!(err.is_stale());
        assert_eq!(metrics.get_stats().conflicts, 1);

        let cached = cache.get(EntityKind::Capability, "CAP-1").await.unwrap();
        assert_eq!(cached.version, 2);
        assert_eq!(cached.state.approval_status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_cached_version_is_sent_as_lock_token() {
        let mut store = MockStateStore::new();
        store
            .expect_upsert()
            .withf(|patch| patch.version == Some(4))
            .times(1)
            .returning(|patch| {
                let mut entity = stored(patch.entity_kind(), &patch.business_id, 5);
                entity.state = patch.state.apply(&EntityState::default());
                Ok(entity)
            });
        let (orchestrator, cache, _) = orchestrator(Arc::new(store));
        cache.insert_confirmed(stored(EntityKind::StoryCard, "STORY-1", 4)).await;

        let request = SyncRequest::transition(EntityKind::StoryCard, "STORY-1", Action::Reset);
        let entity = orchestrator.sync(&request).await.unwrap();
        assert_eq!(entity.version, 5);
        assert_eq!(cache.get(EntityKind::StoryCard, "STORY-1").await.unwrap().version, 5);
    }

    #[tokio::test]
    async fn test_missing_parent_is_created_in_one_hop() {
        let store = Arc::new(MemoryStateStore::new());
        let (orchestrator, cache, metrics) = orchestrator(store.clone());

        let request = SyncRequest::transition(
            EntityKind::Enabler,
            "ENB-1",
            Action::approve(Phase::Specification),
        )
        .with_parent(Some(ParentRef {
            business_id: "CAP-1".to_string(),
            seed: None,
        }));
        let enabler = orchestrator.sync(&request).await.unwrap();

        let capability = store.fetch("ws", EntityKind::Capability, "CAP-1").await.unwrap();
        assert_eq!(capability.state.lifecycle_state, LifecycleState::Draft);
        assert_eq!(capability.state.stage_status, StageStatus::InProgress);
        assert_eq!(enabler.parent_capability_internal_id, Some(capability.internal_id));
        assert_eq!(enabler.state.approval_status, ApprovalStatus::Approved);
        assert!(cache.contains(EntityKind::Capability, "CAP-1"));
        assert_eq!(metrics.get_stats().parent_creations, 1);
    }

    #[tokio::test]
    async fn test_parent_fetch_network_error_stops_before_child_write() {
        let mut store = MockStateStore::new();
        store
            .expect_fetch()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Network("timeout".to_string())));
        store.expect_upsert().times(0);
        let (orchestrator, _, _) = orchestrator(Arc::new(store));

        let request = SyncRequest::transition(EntityKind::Enabler, "ENB-1", Action::Reset)
            .with_parent(Some(ParentRef {
                business_id: "CAP-1".to_string(),
                seed: None,
            }));
        assert!(orchestrator.sync(&request).await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_parent_backend_failure_is_not_a_foreign_key_error() {
        let mut store = MockStateStore::new();
        store
            .expect_fetch()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Backend("state file is corrupt".to_string())));
        store.expect_upsert().times(0);
        let (orchestrator, _, _) = orchestrator(Arc::new(store));

        let request = SyncRequest::transition(EntityKind::Enabler, "ENB-1", Action::Reset)
            .with_parent(Some(ParentRef {
                business_id: "CAP-1".to_string(),
                seed: None,
            }));
        let err = orchestrator.sync(&request).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::Store {
                source: StoreError::Backend(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_seed_creates_with_document_content() {
        let store = Arc::new(MemoryStateStore::new());
        let (orchestrator, _, _) = orchestrator(store);

        let seed = DocumentSeed::new(EntityKind::Capability, "CAP-7", "Refunds")
            .with_file_path("specs/CAP-7.md");
        let request = SyncRequest::new(EntityKind::Capability, "CAP-7", SyncIntent::Seed)
            .with_seed(Some(seed));
        let entity = orchestrator.sync(&request).await.unwrap();

        assert_eq!(entity.name, "Refunds");
        assert_eq!(entity.file_path.as_deref(), Some("specs/CAP-7.md"));
        assert_eq!(entity.state, EntityState::default());
        assert_eq!(entity.version, 1);
    }
}
