// Per-kind entity cache holding only store-confirmed snapshots

use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::model::{Entity, EntityKind, Phase, PhaseApproval, WorkspaceSnapshot};
use crate::observability::SyncMetrics;

/// Last-known entities by business id, one map per kind, plus phase approvals.
///
/// Nothing but store responses is written here. An insert carrying an older
/// version than the one already cached is ignored, so the cached version
/// never goes backwards.
#[derive(Clone)]
pub struct EntityCache {
    capabilities: Cache<String, Entity>,
    enablers: Cache<String, Entity>,
    story_cards: Cache<String, Entity>,
    phases: Cache<Phase, PhaseApproval>,
    metrics: Arc<SyncMetrics>,
}

impl EntityCache {
    pub fn new(metrics: Arc<SyncMetrics>) -> Self {
        Self {
            capabilities: Cache::builder().build(),
            enablers: Cache::builder().build(),
            story_cards: Cache::builder().build(),
            phases: Cache::builder().build(),
            metrics,
        }
    }

    fn table(&self, kind: EntityKind) -> &Cache<String, Entity> {
        match kind {
            EntityKind::Capability => &self.capabilities,
            EntityKind::Enabler => &self.enablers,
            EntityKind::StoryCard => &self.story_cards,
        }
    }

    pub async fn get(&self, kind: EntityKind, business_id: &str) -> Option<Entity> {
        let cached = self.table(kind).get(business_id).await;
        if cached.is_some() {
            self.metrics.record_cache_hit();
        } else {
            self.metrics.record_cache_miss();
        }
        cached
    }

    pub fn contains(&self, kind: EntityKind, business_id: &str) -> bool {
        self.table(kind).contains_key(business_id)
    }

    /// Store the entity exactly as the store returned it. The version compare
    /// and the write happen as one step on the entry.
    pub async fn insert_confirmed(&self, entity: Entity) {
        let kind = entity.kind;
        let offered_version = entity.version;
        let result = self
            .table(kind)
            .entry(entity.business_id.clone())
            .and_compute_with(|current| {
                let op = match current {
                    Some(current) if current.value().version > entity.version => Op::Nop,
                    _ => Op::Put(entity),
                };
                std::future::ready(op)
            })
            .await;

        if let CompResult::Unchanged(current) = result {
            debug!(
                kind = %kind,
                business_id = %current.key(),
                cached_version = current.value().version,
                offered_version,
                "ignoring older entity snapshot"
            );
        }
    }

    pub async fn invalidate(&self, kind: EntityKind, business_id: &str) {
        self.table(kind).invalidate(business_id).await;
    }

    /// Sorted by business id
    pub fn entities(&self, kind: EntityKind) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.table(kind).iter().map(|(_, e)| e).collect();
        entities.sort_by(|a, b| a.business_id.cmp(&b.business_id));
        entities
    }

    /// Capability with the given store id, if cached
    pub fn capability_by_internal_id(&self, internal_id: i64) -> Option<Entity> {
        self.capabilities
            .iter()
            .map(|(_, e)| e)
            .find(|e| e.internal_id == internal_id)
    }

    pub async fn phase(&self, phase: Phase) -> Option<PhaseApproval> {
        self.phases.get(&phase).await
    }

    pub async fn insert_phase(&self, approval: PhaseApproval) {
        self.phases.insert(approval.phase, approval).await;
    }

    pub fn phase_approvals(&self) -> Vec<PhaseApproval> {
        let mut approvals: Vec<PhaseApproval> = self.phases.iter().map(|(_, a)| a).collect();
        approvals.sort_by_key(|a| a.phase);
        approvals
    }

    /// Replace the whole cache with a fresh store snapshot. Entries missing
    /// from the snapshot are dropped.
    pub async fn replace_all(&self, snapshot: &WorkspaceSnapshot) {
        for kind in EntityKind::ALL {
            let table = self.table(kind);
            let fresh = snapshot.entities(kind);
            let keep: HashSet<&str> = fresh.iter().map(|e| e.business_id.as_str()).collect();

            let stale: Vec<Arc<String>> = table
                .iter()
                .map(|(key, _)| key)
                .filter(|key| !keep.contains(key.as_str()))
                .collect();
            for key in stale {
                table.invalidate(key.as_str()).await;
            }
            for entity in fresh {
                table.insert(entity.business_id.clone(), entity.clone()).await;
            }
        }

        let keep_phases: HashSet<Phase> = snapshot.phase_approvals.iter().map(|a| a.phase).collect();
        let stale_phases: Vec<Phase> = self
            .phases
            .iter()
            .map(|(phase, _)| *phase)
            .filter(|phase| !keep_phases.contains(phase))
            .collect();
        for phase in stale_phases {
            self.phases.invalidate(&phase).await;
        }
        for approval in &snapshot.phase_approvals {
            self.phases.insert(approval.phase, approval.clone()).await;
        }

        debug!(
            entities = snapshot.entity_count(),
            phases = snapshot.phase_approvals.len(),
            "entity cache refreshed"
        );
    }

    /// Current cache contents in snapshot form
    pub fn snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            capabilities: self.entities(EntityKind::Capability),
            enablers: self.entities(EntityKind::Enabler),
            story_cards: self.entities(EntityKind::StoryCard),
            phase_approvals: self.phase_approvals(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityState;
    use chrono::Utc;

    fn entity(kind: EntityKind, id: &str, version: u64) -> Entity {
        Entity {
            business_id: id.to_string(),
            internal_id: version as i64,
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

    fn cache() -> (EntityCache, Arc<SyncMetrics>) {
        let metrics = Arc::new(SyncMetrics::new());
        (EntityCache::new(metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn test_older_version_never_replaces_newer() {
        let (cache, _) = cache();
        cache.insert_confirmed(entity(EntityKind::Capability, "CAP-1", 3)).await;
        cache.insert_confirmed(entity(EntityKind::Capability, "CAP-1", 2)).await;

        let cached = cache.get(EntityKind::Capability, "CAP-1").await.unwrap();
        assert_eq!(cached.version, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_keep_newest_version() {
        let (cache, _) = cache();
        let handles: Vec<_> = (1..=50u64)
            .rev()
            .chain(1..=50u64)
            .map(|version| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .insert_confirmed(entity(EntityKind::Capability, "CAP-1", version))
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let cached = cache.get(EntityKind::Capability, "CAP-1").await.unwrap();
        assert_eq!(cached.version, 50);
    }

    #[tokio::test]
    async fn test_kinds_are_separate_maps() {
        let (cache, metrics) = cache();
        cache.insert_confirmed(entity(EntityKind::Enabler, "X-1", 1)).await;

        assert!(cache.get(EntityKind::Capability, "X-1").await.is_none());
        assert!(cache.get(EntityKind::Enabler, "X-1").await.is_some());

        let stats = metrics.get_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_replace_all_drops_missing_entries() {
        let (cache, _) = cache();
        cache.insert_confirmed(entity(EntityKind::StoryCard, "STORY-1", 1)).await;
        cache.insert_confirmed(entity(EntityKind::StoryCard, "STORY-2", 1)).await;

        let snapshot = WorkspaceSnapshot {
            story_cards: vec![entity(EntityKind::StoryCard, "STORY-2", 4)],
            ..WorkspaceSnapshot::default()
        };
        cache.replace_all(&snapshot).await;

        let cards = cache.entities(EntityKind::StoryCard);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].business_id, "STORY-2");
        assert_eq!(cards[0].version, 4);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let (cache, _) = cache();
        cache.insert_confirmed(entity(EntityKind::Capability, "CAP-1", 1)).await;
        cache.invalidate(EntityKind::Capability, "CAP-1").await;
        assert!(!cache.contains(EntityKind::Capability, "CAP-1"));
        assert!(cache.entities(EntityKind::Capability).is_empty());
    }
}
