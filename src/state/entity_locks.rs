use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per entity. Holding the guard means no other task is
/// computing snapshots for that entity; different entities never contend.
#[derive(Default)]
pub struct EntityLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EntityLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn handle(&self, entity_id: &str) -> Arc<Mutex<()>> {
        // Clone the Arc out so the shard lock is released before awaiting.
        Arc::clone(self.locks.entry(entity_id.to_string()).or_default().value())
    }

    pub async fn lock(&self, entity_id: &str) -> OwnedMutexGuard<()> {
        self.handle(entity_id).lock_owned().await
    }
}
