use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Counters for one workflow service instance
#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub store_calls: AtomicU64,
    pub store_errors: AtomicU64,
    pub conflicts: AtomicU64,
    pub parent_creations: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub bulk_items_ok: AtomicU64,
    pub bulk_items_failed: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_store_call(&self) {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self, business_id: &str) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        warn!(business_id = %business_id, "optimistic lock conflict");
    }

    pub fn record_parent_creation(&self) {
        self.parent_creations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bulk_item(&self, ok: bool) {
        if ok {
            self.bulk_items_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bulk_items_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            store_calls: self.store_calls.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            parent_creations: self.parent_creations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            bulk_items_ok: self.bulk_items_ok.load(Ordering::Relaxed),
            bulk_items_failed: self.bulk_items_failed.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            store_calls = stats.store_calls,
            store_errors = stats.store_errors,
            conflicts = stats.conflicts,
            parent_creations = stats.parent_creations,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            bulk_items_ok = stats.bulk_items_ok,
            bulk_items_failed = stats.bulk_items_failed,
            "sync metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStats {
    pub store_calls: u64,
    pub store_errors: u64,
    pub conflicts: u64,
    pub parent_creations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bulk_items_ok: u64,
    pub bulk_items_failed: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
