// Phase aggregation: progress over a scope and the phase approval decision

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::cache::EntityCache;
use crate::documents::DocumentIndex;
use crate::errors::ApprovalError;
use crate::model::{ApprovalStatus, Entity, EntityKind, Phase, PhaseApproval};
use crate::observability::SyncMetrics;
use crate::store::StateStore;

/// One entity counted towards a phase. `approval_status` is `None` when the
/// document exists but the store has no record yet; that counts as pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeItem {
    pub business_id: String,
    pub approval_status: Option<ApprovalStatus>,
}

impl ScopeItem {
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            business_id: entity.business_id.clone(),
            approval_status: Some(entity.state.approval_status),
        }
    }

    pub fn untracked(business_id: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            approval_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeCategory {
    pub kind: EntityKind,
    pub items: Vec<ScopeItem>,
}

/// The entities a phase decision is taken over, grouped by required kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseScope {
    pub phase: Phase,
    pub categories: Vec<ScopeCategory>,
}

impl PhaseScope {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            categories: Vec::new(),
        }
    }

    pub fn with_category(mut self, kind: EntityKind, items: Vec<ScopeItem>) -> Self {
        self.categories.push(ScopeCategory { kind, items });
        self
    }

    /// Scope built from what is known locally.
    ///
    /// With registered documents, each document of a required kind is one
    /// item, matched against the cached entity. Without any documents, every
    /// cached entity of a required kind is in scope.
    pub fn derive(
        phase: Phase,
        required: &[EntityKind],
        documents: &DocumentIndex,
        cache: &EntityCache,
    ) -> Self {
        let categories = required
            .iter()
            .map(|&kind| {
                let cached = cache.entities(kind);
                let items = if documents.is_empty() {
                    cached.iter().map(ScopeItem::from_entity).collect()
                } else {
                    let by_id: HashMap<&str, &Entity> = cached
                        .iter()
                        .map(|e| (e.business_id.as_str(), e))
                        .collect();
                    documents
                        .of_kind(kind)
                        .map(|seed| match by_id.get(seed.business_id.as_str()) {
                            Some(entity) => ScopeItem::from_entity(entity),
                            None => ScopeItem::untracked(&seed.business_id),
                        })
                        .collect()
                };
                ScopeCategory { kind, items }
            })
            .collect();
        Self { phase, categories }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryProgress {
    pub kind: EntityKind,
    pub total: usize,
    pub approved_count: usize,
    pub rejected_count: usize,
}

impl CategoryProgress {
    fn is_complete(&self) -> bool {
        self.total > 0 && self.approved_count == self.total && self.rejected_count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseProgress {
    pub phase: Phase,
    pub categories: Vec<CategoryProgress>,
    pub total: usize,
    pub approved_count: usize,
    pub rejected_count: usize,
    /// Rounded to the nearest whole percent, 0 for an empty scope
    pub completion_percentage: u8,
}

impl PhaseProgress {
    pub fn compute(scope: &PhaseScope) -> Self {
        let categories: Vec<CategoryProgress> = scope
            .categories
            .iter()
            .map(|category| {
                let count = |status: ApprovalStatus| {
                    category
                        .items
                        .iter()
                        .filter(|item| item.approval_status == Some(status))
                        .count()
                };
                CategoryProgress {
                    kind: category.kind,
                    total: category.items.len(),
                    approved_count: count(ApprovalStatus::Approved),
                    rejected_count: count(ApprovalStatus::Rejected),
                }
            })
            .collect();

        let total: usize = categories.iter().map(|c| c.total).sum();
        let approved_count: usize = categories.iter().map(|c| c.approved_count).sum();
        let rejected_count: usize = categories.iter().map(|c| c.rejected_count).sum();
        let completion_percentage = if total == 0 {
            0
        } else {
            (approved_count as f64 / total as f64 * 100.0).round() as u8
        };

        Self {
            phase: scope.phase,
            categories,
            total,
            approved_count,
            rejected_count,
            completion_percentage,
        }
    }

    /// Every required category is non-empty, fully approved and has no
    /// rejections. A scope without categories never qualifies.
    pub fn can_approve_phase(&self) -> bool {
        !self.categories.is_empty() && self.categories.iter().all(CategoryProgress::is_complete)
    }

    pub fn blockers(&self) -> Vec<String> {
        if self.categories.is_empty() {
            return vec![format!("no entity kinds are required for {}", self.phase)];
        }
        let mut blockers = Vec::new();
        for category in &self.categories {
            if category.total == 0 {
                blockers.push(format!("no {} entities in scope", category.kind));
                continue;
            }
            if category.rejected_count > 0 {
                blockers.push(format!(
                    "{} of {} {} entities rejected",
                    category.rejected_count, category.total, category.kind
                ));
            }
            let pending = category.total - category.approved_count - category.rejected_count;
            if pending > 0 {
                blockers.push(format!(
                    "{} of {} {} entities not yet approved",
                    pending, category.total, category.kind
                ));
            }
        }
        blockers
    }
}

/// Phase-level approve and revoke on top of the store and cache
#[derive(Clone)]
pub struct PhaseAggregator {
    workspace_id: String,
    store: Arc<dyn StateStore>,
    cache: EntityCache,
    metrics: Arc<SyncMetrics>,
}

impl PhaseAggregator {
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

    /// Approve `scope.phase` if its scope qualifies. Always goes to the store,
    /// which hands back an already approved record unchanged with its
    /// original `approved_at`.
    pub async fn approve_phase(&self, scope: &PhaseScope) -> Result<PhaseApproval, ApprovalError> {
        let phase = scope.phase;
        let progress = PhaseProgress::compute(scope);
        if !progress.can_approve_phase() {
            return Err(ApprovalError::PhaseNotReady {
                phase,
                reason: progress.blockers().join("; "),
            });
        }

        self.metrics.record_store_call();
        let approval = self
            .store
            .approve_phase(&self.workspace_id, phase)
            .await
            .map_err(|e| {
                self.metrics.record_store_error();
                ApprovalError::from_store_operation(&format!("approve phase {phase}"), e)
            })?;
        info!(
            phase = %phase,
            total = progress.total,
            approved_at = ?approval.approved_at,
            "phase approved"
        );
        self.cache.insert_phase(approval.clone()).await;
        Ok(approval)
    }

    /// Clears the phase record only. Entity approvals stay as they are.
    pub async fn revoke_phase(&self, phase: Phase) -> Result<PhaseApproval, ApprovalError> {
        self.metrics.record_store_call();
        let approval = self
            .store
            .revoke_phase(&self.workspace_id, phase)
            .await
            .map_err(|e| {
                self.metrics.record_store_error();
                ApprovalError::from_store_operation(&format!("revoke phase {phase}"), e)
            })?;
        info!(phase = %phase, "phase approval revoked");
        self.cache.insert_phase(approval.clone()).await;
        Ok(approval)
    }

    pub async fn is_phase_approved(&self, phase: Phase) -> bool {
        self.cache.phase(phase).await.is_some_and(|a| a.approved)
    }

    /// Phases from `phases` that are not approved, in the given order
    pub async fn missing_approvals(&self, phases: &[Phase]) -> Vec<Phase> {
        let mut missing = Vec::new();
        for &phase in phases {
            if !self.is_phase_approved(phase).await {
                missing.push(phase);
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStateStore, MockStateStore, StoreError};

    fn items(statuses: &[ApprovalStatus]) -> Vec<ScopeItem> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| ScopeItem {
                business_id: format!("ID-{i}"),
                approval_status: Some(*status),
            })
            .collect()
    }

    fn aggregator(store: Arc<dyn StateStore>) -> PhaseAggregator {
        let metrics = Arc::new(SyncMetrics::new());
        PhaseAggregator::new("ws", store, EntityCache::new(metrics.clone()), metrics)
    }

    #[test]
    fn test_progress_counts_and_rounding() {
        use ApprovalStatus::*;
        let scope = PhaseScope::new(Phase::Specification)
            .with_category(EntityKind::Capability, items(&[Approved, Pending, Rejected]));
        let progress = PhaseProgress::compute(&scope);

        assert_eq!(progress.total, 3);
        assert_eq!(progress.approved_count, 1);
        assert_eq!(progress.rejected_count, 1);
        assert_eq!(progress.completion_percentage, 33);
        assert!(!progress.can_approve_phase());
        assert_eq!(progress.blockers().len(), 2);

        let two_of_three = PhaseScope::new(Phase::Intent)
            .with_category(EntityKind::StoryCard, items(&[Approved, Approved, Pending]));
        assert_eq!(PhaseProgress::compute(&two_of_three).completion_percentage, 67);
    }

    #[test]
    fn test_empty_scope_cannot_be_approved() {
        let no_categories = PhaseProgress::compute(&PhaseScope::new(Phase::Intent));
        assert_eq!(no_categories.completion_percentage, 0);
        assert!(!no_categories.can_approve_phase());

        let empty_category = PhaseScope::new(Phase::Specification)
            .with_category(EntityKind::Capability, items(&[ApprovalStatus::Approved]))
            .with_category(EntityKind::Enabler, Vec::new());
        assert!(!PhaseProgress::compute(&empty_category).can_approve_phase());
    }

    #[test]
    fn test_untracked_documents_count_as_pending() {
        let scope = PhaseScope::new(Phase::Intent).with_category(
            EntityKind::StoryCard,
            vec![
                ScopeItem {
                    business_id: "STORY-1".to_string(),
                    approval_status: Some(ApprovalStatus::Approved),
                },
                ScopeItem::untracked("STORY-2"),
            ],
        );
        let progress = PhaseProgress::compute(&scope);
        assert_eq!(progress.total, 2);
        assert!(!progress.can_approve_phase());
    }

    #[tokio::test]
    async fn test_not_ready_phase_never_reaches_store() {
        let store = MockStateStore::new();
        let aggregator = aggregator(Arc::new(store));
        let scope = PhaseScope::new(Phase::Intent)
            .with_category(EntityKind::StoryCard, items(&[ApprovalStatus::Pending]));

        assert!(matches!(
            aggregator.approve_phase(&scope).await,
            Err(ApprovalError::PhaseNotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_approve_is_idempotent() {
        let aggregator = aggregator(Arc::new(MemoryStateStore::new()));
        let scope = PhaseScope::new(Phase::Intent)
            .with_category(EntityKind::StoryCard, items(&[ApprovalStatus::Approved]));

        let first = aggregator.approve_phase(&scope).await.unwrap();
        let second = aggregator.approve_phase(&scope).await.unwrap();
        assert_eq!(first.approved_at, second.approved_at);
        assert!(aggregator.is_phase_approved(Phase::Intent).await);
        assert_eq!(
            aggregator.missing_approvals(&[Phase::Intent, Phase::UiDesign]).await,
            vec![Phase::UiDesign]
        );
    }

    #[tokio::test]
    async fn test_repeat_approve_still_writes_through_store() {
        let approved_at = chrono::Utc::now();
        let mut store = MockStateStore::new();
        store
            .expect_approve_phase()
            .times(2)
            .returning(move |ws, phase| {
                Ok(PhaseApproval {
                    workspace_id: ws.to_string(),
                    phase,
                    approved: true,
                    approved_at: Some(approved_at),
                })
            });
        let aggregator = aggregator(Arc::new(store));
        let scope = PhaseScope::new(Phase::Intent)
            .with_category(EntityKind::StoryCard, items(&[ApprovalStatus::Approved]));

        let first = aggregator.approve_phase(&scope).await.unwrap();
        let second = aggregator.approve_phase(&scope).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_store_failure_on_approve_is_reported() {
        let mut store = MockStateStore::new();
        store
            .expect_approve_phase()
            .times(1)
            .returning(|_, _| Err(StoreError::Network("offline".to_string())));
        let aggregator = aggregator(Arc::new(store));
        let scope = PhaseScope::new(Phase::Intent)
            .with_category(EntityKind::StoryCard, items(&[ApprovalStatus::Approved]));

        assert!(aggregator.approve_phase(&scope).await.unwrap_err().is_network());
        assert!(!aggregator.is_phase_approved(Phase::Intent).await);
    }

    #[tokio::test]
    async fn test_revoke_clears_record() {
        let aggregator = aggregator(Arc::new(MemoryStateStore::new()));
        let scope = PhaseScope::new(Phase::Intent)
            .with_category(EntityKind::StoryCard, items(&[ApprovalStatus::Approved]));
        aggregator.approve_phase(&scope).await.unwrap();

        let revoked = aggregator.revoke_phase(Phase::Intent).await.unwrap();
        assert!(!revoked.approved);
        assert!(revoked.approved_at.is_none());
        assert!(!aggregator.is_phase_approved(Phase::Intent).await);
    }
}
