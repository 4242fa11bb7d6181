use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::config::CACHE_MAX_ENTRIES;
use crate::types::DailySnapshot;

/// Read-through cache of per-entity snapshot history, oldest first.
///
/// Entries expire `ttl` after insertion and the cache holds at most
/// `CACHE_MAX_ENTRIES` entities. Writers call `invalidate` after every upsert
/// for the entity.
pub struct SnapshotCache {
    /// entity_id → ordered history
    entries: Cache<String, Arc<Vec<DailySnapshot>>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(CACHE_MAX_ENTRIES)
                .build(),
        })
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<Vec<DailySnapshot>>> {
        self.entries.get(entity_id)
    }

    pub fn insert(&self, entity_id: &str, snapshots: Vec<DailySnapshot>) {
        self.entries.insert(entity_id.to_string(), Arc::new(snapshots));
    }

    pub fn invalidate(&self, entity_id: &str) {
        self.entries.invalidate(entity_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
