use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::ingest::{FilterStats, ReconcileCounts};

/// Result of one entity's task.
#[derive(Debug)]
pub enum EntityOutcome {
    Processed {
        filter: FilterStats,
        reconcile: ReconcileCounts,
    },
    /// No observations or summaries for the date; the stored snapshot stays.
    Skipped,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub target_date: NaiveDate,
    pub entities_total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<EntityFailure>,
    pub filter: FilterStats,
    pub reconcile: ReconcileCounts,
    /// Batch records whose entity could not be resolved.
    pub dropped_unknown: usize,
    pub index_computed: bool,
    /// The index was built while some entities had failed.
    pub index_partial: bool,
}

impl RunSummary {
    pub fn new(target_date: NaiveDate) -> Self {
        Self {
            target_date,
            entities_total: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            filter: FilterStats::default(),
            reconcile: ReconcileCounts::default(),
            dropped_unknown: 0,
            index_computed: false,
            index_partial: false,
        }
    }

    pub fn record(&mut self, entity_id: String, outcome: EntityOutcome) {
        self.entities_total += 1;
        match outcome {
            EntityOutcome::Processed { filter, reconcile } => {
                self.processed += 1;
                self.filter.merge(&filter);
                self.reconcile.merge(&reconcile);
            }
            EntityOutcome::Skipped => self.skipped += 1,
            EntityOutcome::Failed { reason } => {
                self.failed += 1;
                self.failures.push(EntityFailure { entity_id, reason });
            }
        }
    }

    pub fn log(&self) {
        info!(
            target_date = %self.target_date,
            entities = self.entities_total,
            processed = self.processed,
            skipped = self.skipped,
            failed = self.failed,
            index_computed = self.index_computed,
            index_partial = self.index_partial,
            "Run complete"
        );
        info!(
            input = self.filter.input,
            accepted = self.filter.accepted,
            malformed = self.filter.rejected_malformed,
            marketplace = self.filter.rejected_marketplace,
            region = self.filter.rejected_region,
            title = self.filter.rejected_title,
            price = self.filter.rejected_price,
            title_fallback = self.filter.title_fallback_matches,
            "[FILTER] observation counts"
        );
        info!(
            new_listings = self.reconcile.new_listings,
            updated_listings = self.reconcile.updated_listings,
            duplicate_listings = self.reconcile.duplicate_listings,
            new_sales = self.reconcile.new_sales,
            duplicate_sales = self.reconcile.duplicate_sales,
            "[RECONCILE] classification counts"
        );
        for f in &self.failures {
            warn!(entity_id = %f.entity_id, "Entity failed: {}", f.reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tallies_outcomes() {
        let mut summary = RunSummary::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        summary.record(
            "a".into(),
            EntityOutcome::Processed {
                filter: FilterStats { input: 3, accepted: 2, rejected_price: 1, ..Default::default() },
                reconcile: ReconcileCounts { new_listings: 2, ..Default::default() },
            },
        );
        summary.record("b".into(), EntityOutcome::Skipped);
        summary.record("c".into(), EntityOutcome::Failed { reason: "boom".into() });

        assert_eq!((summary.entities_total, summary.processed, summary.skipped, summary.failed), (3, 1, 1, 1));
        assert_eq!(summary.filter.rejected_price, 1);
        assert_eq!(summary.reconcile.new_listings, 2);
        assert_eq!(
            summary.failures,
            vec![EntityFailure { entity_id: "c".into(), reason: "boom".into() }]
        );
    }
}
