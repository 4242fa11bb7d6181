//! Shared health state for the /health endpoint.
//! Written by the batch runner after each run, read by the API.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use crate::pipeline::RunSummary;

#[derive(Default)]
pub struct HealthState {
    /// Unix seconds of the last finished run (0 = none yet).
    pub last_run_at: AtomicI64,
    pub runs_completed: AtomicU64,
    pub last_processed: AtomicU64,
    pub last_skipped: AtomicU64,
    pub last_failed: AtomicU64,
    pub last_index_computed: AtomicBool,
    pub last_index_partial: AtomicBool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub last_run_at: Option<i64>,
    pub runs_completed: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub index_computed: bool,
    pub index_partial: bool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, summary: &RunSummary, finished_at: i64) {
        self.last_processed.store(summary.processed as u64, Ordering::Relaxed);
        self.last_skipped.store(summary.skipped as u64, Ordering::Relaxed);
        self.last_failed.store(summary.failed as u64, Ordering::Relaxed);
        self.last_index_computed.store(summary.index_computed, Ordering::Relaxed);
        self.last_index_partial.store(summary.index_partial, Ordering::Relaxed);
        self.last_run_at.store(finished_at, Ordering::Relaxed);
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let at = self.last_run_at.load(Ordering::Relaxed);
        HealthSnapshot {
            last_run_at: (at > 0).then_some(at),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            processed: self.last_processed.load(Ordering::Relaxed),
            skipped: self.last_skipped.load(Ordering::Relaxed),
            failed: self.last_failed.load(Ordering::Relaxed),
            index_computed: self.last_index_computed.load(Ordering::Relaxed),
            index_partial: self.last_index_partial.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn empty_until_first_run() {
        let health = HealthState::new();
        assert_eq!(health.snapshot().last_run_at, None);
        assert_eq!(health.snapshot().runs_completed, 0);
    }

    #[test]
    fn record_run_copies_counters() {
        let health = HealthState::new();
        let mut summary = RunSummary::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        summary.processed = 7;
        summary.failed = 1;
        summary.index_computed = true;
        summary.index_partial = true;

        health.record_run(&summary, 1_740_787_200);
        let snap = health.snapshot();
        assert_eq!(snap.last_run_at, Some(1_740_787_200));
        assert_eq!((snap.processed, snap.skipped, snap.failed), (7, 0, 1));
        assert!(snap.index_computed && snap.index_partial);
        assert_eq!(snap.runs_completed, 1);
    }
}
