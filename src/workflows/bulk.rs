// Bulk operations: one action over many entities, sequentially, partial success

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use super::guarded::{guarded_update, OptimisticOverlay};
use super::transitions::{resulting_state, Action};
use crate::errors::ApprovalError;
use crate::model::{Entity, EntityKind, EntityState};
use crate::observability::SyncMetrics;
use crate::telemetry::{create_bulk_span, generate_correlation_id};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BulkItem {
    pub kind: EntityKind,
    pub business_id: String,
}

impl BulkItem {
    pub fn new(kind: EntityKind, business_id: impl Into<String>) -> Self {
        Self {
            kind,
            business_id: business_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub kind: EntityKind,
    pub business_id: String,
    pub reason: String,
}

/// Result of a bulk run. Succeeded items stay applied even when others fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub success_count: usize,
    pub fail_count: usize,
    pub failures: Vec<BulkFailure>,
    /// False when the closing cache refresh failed
    pub refreshed: bool,
}

impl BulkOutcome {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.business_id.as_str()).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.fail_count == 0
    }
}

/// Per-item operations the coordinator drives
#[async_trait]
pub trait ItemSync: Send + Sync {
    /// Orchestrated sync of one item
    async fn sync_item(&self, item: &BulkItem, action: &Action) -> Result<Entity, ApprovalError>;

    /// Last confirmed state, used to build the optimistic view
    async fn cached_state(&self, item: &BulkItem) -> Option<EntityState>;

    /// One workspace-level refresh
    async fn refresh(&self) -> Result<(), ApprovalError>;
}

pub struct BulkCoordinator<'a, S: ItemSync + ?Sized> {
    sync: &'a S,
    metrics: Arc<SyncMetrics>,
}

impl<'a, S: ItemSync + ?Sized> BulkCoordinator<'a, S> {
    pub fn new(sync: &'a S, metrics: Arc<SyncMetrics>) -> Self {
        Self { sync, metrics }
    }

    /// Apply `action` to every item in order.
    ///
    /// A malformed action fails the whole call before anything is touched.
    /// Per-item failures are recorded and the loop moves on; the optimistic
    /// entry for a failed item is rolled back from `overlay`. One refresh runs
    /// after the loop.
    pub async fn run(
        &self,
        items: &[BulkItem],
        action: &Action,
        overlay: &mut OptimisticOverlay,
    ) -> Result<BulkOutcome, ApprovalError> {
        action.validate()?;

        let correlation_id = generate_correlation_id();
        let span = create_bulk_span(action.name(), items.len(), &correlation_id);
        let outcome = self.run_items(items, action, overlay).instrument(span).await;
        Ok(outcome)
    }

    async fn run_items(
        &self,
        items: &[BulkItem],
        action: &Action,
        overlay: &mut OptimisticOverlay,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();

        for item in items {
            let current = self.sync.cached_state(item).await.unwrap_or_default();
            let optimistic = match resulting_state(&current, action) {
                Ok(state) => state,
                Err(err) => {
                    self.record_failure(&mut outcome, item, &err.to_string());
                    continue;
                }
            };

            let result = guarded_update(
                overlay,
                |o| o.apply(item.kind, &item.business_id, optimistic),
                || self.sync.sync_item(item, action),
                |o, previous| o.restore(item.kind, &item.business_id, previous),
            )
            .await;

            match result {
                Ok(_) => {
                    overlay.confirm(item.kind, &item.business_id);
                    outcome.success_count += 1;
                    self.metrics.record_bulk_item(true);
                }
                Err(err) => self.record_failure(&mut outcome, item, &err.to_string()),
            }
        }

        outcome.refreshed = match self.sync.refresh().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "cache refresh after bulk operation failed");
                false
            }
        };

        info!(
            action = action.name(),
            success_count = outcome.success_count,
            fail_count = outcome.fail_count,
            "bulk operation finished"
        );
        outcome
    }

    fn record_failure(&self, outcome: &mut BulkOutcome, item: &BulkItem, reason: &str) {
        warn!(
            kind = %item.kind,
            business_id = %item.business_id,
            reason = %reason,
            "bulk item failed"
        );
        self.metrics.record_bulk_item(false);
        outcome.fail_count += 1;
        outcome.failures.push(BulkFailure {
            kind: item.kind,
            business_id: item.business_id.clone(),
            reason: reason.to_string(),
        });
    }
}
