use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::collector::{self, Batch, EntityBatch};
use crate::config::{Config, FilterConfig};
use crate::db::SnapshotRepository;
use crate::error::{AppError, Result};
use crate::index::{compute_index, IndexMember};
use crate::ingest::reconcile::sale_key;
use crate::ingest::{filter_observations, reconcile_listings, reconcile_sales, KnownListing};
use crate::metrics::compute_rolling_metrics;
use crate::pipeline::summary::{EntityOutcome, RunSummary};
use crate::snapshot::{aggregate, build_source_records};
use crate::state::{EntityLocks, HistoryResolver, IdentifierAliases, SnapshotCache};
use crate::types::{DailySnapshot, Entity, ObservationKind};

/// Longest index-change horizon, in days.
const INDEX_LOOKBACK_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// EntityWorker: per-entity filter → reconcile → aggregate → rolling
// ---------------------------------------------------------------------------

/// Everything one entity task needs. Cheap to clone into each task.
#[derive(Clone)]
struct EntityWorker {
    repo: SnapshotRepository,
    resolver: Arc<HistoryResolver>,
    locks: Arc<EntityLocks>,
    filter: Arc<FilterConfig>,
    data_epoch: NaiveDate,
}

impl EntityWorker {
    async fn process(
        &self,
        entity: &Entity,
        inputs: EntityBatch,
        target_date: NaiveDate,
    ) -> Result<EntityOutcome> {
        let _guard = self.locks.lock(&entity.id).await;

        if inputs.is_empty() {
            debug!(entity_id = %entity.id, "No observations for date, keeping last snapshot");
            return Ok(EntityOutcome::Skipped);
        }

        // Nothing is written for this entity unless its history was read.
        let history = self
            .resolver
            .resolve(&entity.id)
            .await
            .map_err(|e| AppError::entity(&entity.id, format!("history unavailable: {e}")))?
            .map(|r| r.snapshots)
            .unwrap_or_default();
        let prior_floor = history
            .iter()
            .rev()
            .filter(|s| s.date < target_date)
            .find_map(|s| s.floor_price.filter(|p| *p > 0.0));

        // --- filter ---
        let (kept, filter) =
            filter_observations(inputs.observations, entity, prior_floor, &self.filter);
        let (listings, sales): (Vec<_>, Vec<_>) =
            kept.into_iter().partition(|o| o.kind == ObservationKind::Listing);

        // --- reconcile against earlier days ---
        let known_listings = self.repo.known_listings_before(&entity.id, target_date).await?;
        let known_sales = self.repo.known_sale_keys_before(&entity.id, target_date).await?;
        let listing_rec = reconcile_listings(listings, &known_listings);
        let sale_rec = reconcile_sales(sales, &known_sales, target_date);

        let mut reconcile = listing_rec.counts();
        reconcile.new_sales = sale_rec.new.len();
        reconcile.duplicate_sales = sale_rec.duplicate.len();

        let seen_listings: Vec<KnownListing> = listing_rec
            .new
            .iter()
            .chain(&listing_rec.updated)
            .chain(&listing_rec.duplicate)
            .filter_map(KnownListing::from_observation)
            .collect();
        let seen_sales: Vec<String> = sale_rec
            .new
            .iter()
            .filter_map(|o| sale_key(o, target_date))
            .collect();

        // --- aggregate ---
        let records = build_source_records(target_date, listing_rec, sale_rec.new, &inputs.summaries);
        let raw = aggregate(&entity.id, target_date, &records);

        // --- rolling metrics over the stored prefix plus today ---
        let mut series: Vec<DailySnapshot> = history
            .into_iter()
            .filter(|s| s.date < target_date)
            .collect();
        series.push(raw);
        let snapshot = compute_rolling_metrics(&entity.id, &series, target_date, self.data_epoch)
            .ok_or_else(|| AppError::entity(&entity.id, "rolling metrics produced no snapshot"))?;

        self.repo.upsert_snapshot(&snapshot).await?;
        self.repo
            .replace_seen(&entity.id, target_date, &seen_listings, &seen_sales)
            .await?;
        self.resolver.cache().invalidate(&entity.id);

        debug!(
            entity_id = %entity.id,
            floor_price = ?snapshot.floor_price,
            boxes_sold_today = ?snapshot.boxes_sold_today,
            valid_data_days = snapshot.valid_data_days,
            "Snapshot upserted"
        );

        Ok(EntityOutcome::Processed { filter, reconcile })
    }

    /// Recompute rolling fields for every stored date in `[from, to]`, oldest first.
    async fn recompute_range(&self, entity_id: &str, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        let _guard = self.locks.lock(entity_id).await;

        let dates = self.repo.snapshot_dates(entity_id, from, to).await?;
        if dates.is_empty() {
            return Ok(0);
        }

        let mut history = self.repo.history(entity_id).await?;
        let mut recomputed = 0usize;
        for date in dates {
            let Some(snapshot) = compute_rolling_metrics(entity_id, &history, date, self.data_epoch) else {
                continue;
            };
            self.repo.upsert_snapshot(&snapshot).await?;
            if let Some(slot) = history.iter_mut().find(|s| s.date == date) {
                *slot = snapshot;
            }
            recomputed += 1;
        }

        self.resolver.cache().invalidate(entity_id);
        Ok(recomputed)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    worker: EntityWorker,
    aliases: Arc<IdentifierAliases>,
    batch_path: PathBuf,
    max_concurrency: usize,
}

impl Pipeline {
    pub fn new(
        cfg: &Config,
        repo: SnapshotRepository,
        cache: Arc<SnapshotCache>,
        locks: Arc<EntityLocks>,
        aliases: Arc<IdentifierAliases>,
    ) -> Self {
        let resolver = HistoryResolver::standard(
            cache,
            repo.clone(),
            cfg.archive_path.as_ref().map(PathBuf::from),
        );
        Self {
            worker: EntityWorker {
                repo,
                resolver: Arc::new(resolver),
                locks,
                filter: Arc::new(cfg.filter.clone()),
                data_epoch: cfg.data_epoch,
            },
            aliases,
            batch_path: PathBuf::from(&cfg.batch_path),
            max_concurrency: cfg.max_concurrency.max(1),
        }
    }

    /// Load the configured batch file and process it for `target_date`.
    pub async fn run(&self, target_date: NaiveDate) -> Result<RunSummary> {
        let batch = collector::load_batch(&self.batch_path).await?;
        self.run_batch(target_date, batch).await
    }

    pub async fn run_batch(&self, target_date: NaiveDate, batch: Batch) -> Result<RunSummary> {
        let repo = &self.worker.repo;

        let stored_ids: HashSet<String> =
            repo.list_entities().await?.into_iter().map(|e| e.id).collect();
        let mut grouped = collector::group_batch(batch, &self.aliases, &stored_ids);
        for entity in &grouped.entities {
            repo.upsert_entity(entity).await?;
        }

        let entities = repo.list_entities().await?;
        if entities.is_empty() {
            return Err(AppError::NoEntityData);
        }
        info!(
            target_date = %target_date,
            entities = entities.len(),
            batch_entities = grouped.stats.entities,
            with_data = grouped.per_entity.len(),
            observations = grouped.stats.observations,
            source_summaries = grouped.stats.source_summaries,
            remapped = grouped.stats.remapped,
            dropped_unknown = grouped.stats.dropped_unknown,
            "Starting run"
        );

        // --- fan out: one task per entity ---
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();
        for entity in entities.iter().cloned() {
            let inputs = grouped.per_entity.remove(&entity.id).unwrap_or_default();
            let worker = self.worker.clone();
            let semaphore = Arc::clone(&semaphore);

            set.spawn(async move {
                let entity_id = entity.id.clone();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return (entity_id, EntityOutcome::Failed { reason: e.to_string() }),
                };
                // Inner task so a panic is reported against this entity.
                let work = tokio::spawn(async move { worker.process(&entity, inputs, target_date).await });
                let outcome = match work.await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => EntityOutcome::Failed { reason: e.to_string() },
                    Err(e) => EntityOutcome::Failed { reason: format!("task failed: {e}") },
                };
                (entity_id, outcome)
            });
        }

        // --- fan in ---
        let mut summary = RunSummary::new(target_date);
        summary.dropped_unknown = grouped.stats.dropped_unknown;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((entity_id, outcome)) => {
                    if let EntityOutcome::Failed { reason } = &outcome {
                        error!(entity_id = %entity_id, "Entity processing failed: {reason}");
                    }
                    summary.record(entity_id, outcome);
                }
                Err(e) => {
                    error!("Entity task aborted: {e}");
                    summary.record("unknown".to_string(), EntityOutcome::Failed { reason: e.to_string() });
                }
            }
        }

        // --- market index over every entity's latest snapshot ---
        match self.build_index(target_date, &entities).await {
            Ok(computed) => {
                summary.index_computed = computed;
                summary.index_partial = computed && summary.failed > 0;
            }
            Err(e) => error!(target_date = %target_date, "Market index failed: {e}"),
        }

        summary.log();
        Ok(summary)
    }

    async fn build_index(&self, target_date: NaiveDate, entities: &[Entity]) -> Result<bool> {
        let repo = &self.worker.repo;

        let mut members = Vec::with_capacity(entities.len());
        for entity in entities {
            match repo.latest_on_or_before(&entity.id, target_date).await {
                Ok(Some(snapshot)) => members.push(IndexMember {
                    entity_id: entity.id.clone(),
                    name: entity.name.clone(),
                    snapshot,
                }),
                Ok(None) => {}
                Err(e) => warn!(entity_id = %entity.id, "Skipping entity in index: {e}"),
            }
        }

        let history = repo
            .index_values(target_date - Duration::days(INDEX_LOOKBACK_DAYS), target_date - Duration::days(1))
            .await?;
        let Some(index) = compute_index(target_date, &members, &history) else {
            warn!(target_date = %target_date, "No entity has a floor price, index not computed");
            return Ok(false);
        };
        repo.upsert_index(&index).await?;

        info!(
            target_date = %target_date,
            index_value = index.index_value,
            change_1d_pct = ?index.change_1d_pct,
            change_7d_pct = ?index.change_7d_pct,
            sentiment = %index.sentiment,
            fear_greed = index.fear_greed_score,
            label = %index.fear_greed_label,
            entities = index.entities_included,
            "Market index upserted"
        );
        Ok(true)
    }

    /// Operator back-dating: recompute rolling metrics for `entity_id` over
    /// `[from, to]` in ascending date order. Returns the number of dates rewritten.
    pub async fn recompute_range(&self, entity_id: &str, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        if from > to {
            return Err(AppError::Config(format!("recompute range {from}..{to} is empty")));
        }
        let entity_id = self.aliases.canonical(entity_id);
        let count = self.worker.recompute_range(entity_id, from, to).await?;
        info!(entity_id = %entity_id, from = %from, to = %to, recomputed = count, "Range recomputed");
        Ok(count)
    }
}
