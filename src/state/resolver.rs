use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::db::SnapshotRepository;
use crate::error::{AppError, Result};
use crate::state::SnapshotCache;
use crate::types::DailySnapshot;

/// One source of per-entity snapshot history.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Tier name for logging
    fn tier(&self) -> &'static str;

    /// Ordered history (oldest first), or None when this tier has nothing
    /// for the entity.
    async fn history(&self, entity_id: &str) -> Result<Option<Vec<DailySnapshot>>>;

    /// Whether an answer from this tier should be written into the cache.
    fn populates_cache(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

pub struct CacheTier {
    cache: Arc<SnapshotCache>,
}

impl CacheTier {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HistoryProvider for CacheTier {
    fn tier(&self) -> &'static str {
        "cache"
    }

    async fn history(&self, entity_id: &str) -> Result<Option<Vec<DailySnapshot>>> {
        Ok(self.cache.get(entity_id).map(|h| h.as_ref().clone()))
    }

    fn populates_cache(&self) -> bool {
        false
    }
}

pub struct SqliteTier {
    repo: SnapshotRepository,
}

impl SqliteTier {
    pub fn new(repo: SnapshotRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl HistoryProvider for SqliteTier {
    fn tier(&self) -> &'static str {
        "sqlite"
    }

    async fn history(&self, entity_id: &str) -> Result<Option<Vec<DailySnapshot>>> {
        let history = self.repo.history(entity_id).await?;
        Ok((!history.is_empty()).then_some(history))
    }
}

/// Flat JSON array of `DailySnapshot` records exported by an older store.
pub struct ArchiveTier {
    path: PathBuf,
}

impl ArchiveTier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HistoryProvider for ArchiveTier {
    fn tier(&self) -> &'static str {
        "archive"
    }

    async fn history(&self, entity_id: &str) -> Result<Option<Vec<DailySnapshot>>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let all: Vec<DailySnapshot> = serde_json::from_str(&raw)?;
        let mut history: Vec<DailySnapshot> =
            all.into_iter().filter(|s| s.entity_id == entity_id).collect();
        history.sort_by_key(|s| s.date);
        Ok((!history.is_empty()).then_some(history))
    }
}

// ---------------------------------------------------------------------------
// HistoryResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHistory {
    pub tier: &'static str,
    pub snapshots: Vec<DailySnapshot>,
}

/// Ordered provider chain; the first tier that answers wins.
pub struct HistoryResolver {
    cache: Arc<SnapshotCache>,
    providers: Vec<Box<dyn HistoryProvider>>,
}

impl HistoryResolver {
    pub fn new(cache: Arc<SnapshotCache>, providers: Vec<Box<dyn HistoryProvider>>) -> Self {
        Self { cache, providers }
    }

    /// cache → sqlite → archive (when configured).
    pub fn standard(
        cache: Arc<SnapshotCache>,
        repo: SnapshotRepository,
        archive_path: Option<PathBuf>,
    ) -> Self {
        let mut providers: Vec<Box<dyn HistoryProvider>> = vec![
            Box::new(CacheTier::new(Arc::clone(&cache))),
            Box::new(SqliteTier::new(repo)),
        ];
        if let Some(path) = archive_path {
            providers.push(Box::new(ArchiveTier::new(path)));
        }
        Self::new(cache, providers)
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// `Ok(None)` when every tier reports no history for the entity. A failing
    /// tier is logged and the next one tried; if no later tier answers, the
    /// failure is returned so callers never mistake it for an empty history.
    pub async fn resolve(&self, entity_id: &str) -> Result<Option<ResolvedHistory>> {
        let mut failure: Option<AppError> = None;
        for provider in &self.providers {
            match provider.history(entity_id).await {
                Ok(Some(snapshots)) => {
                    debug!(
                        entity_id = %entity_id,
                        tier = provider.tier(),
                        snapshots = snapshots.len(),
                        "History resolved"
                    );
                    if provider.populates_cache() {
                        self.cache.insert(entity_id, snapshots.clone());
                    }
                    return Ok(Some(ResolvedHistory {
                        tier: provider.tier(),
                        snapshots,
                    }));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        entity_id = %entity_id,
                        tier = provider.tier(),
                        "History tier failed, trying next: {e}"
                    );
                    failure = Some(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        debug!(entity_id = %entity_id, "No history in any tier");
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
