pub mod runner;
pub mod summary;

pub use runner::Pipeline;
pub use summary::RunSummary;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use sqlx::SqlitePool;

    use super::*;
    use crate::collector::Batch;
    use crate::config::{Config, FilterConfig};
    use crate::db::{test_pool, SnapshotRepository};
    use crate::error::AppError;
    use crate::state::{EntityLocks, IdentifierAliases, SnapshotCache};
    use crate::types::{Entity, ObservationKind, RawObservation};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn config() -> Config {
        Config {
            log_level: "debug".into(),
            db_path: ":memory:".into(),
            batch_path: "unused.json".into(),
            target_date: None,
            data_epoch: day(1),
            filter: FilterConfig::default(),
            aliases_path: None,
            archive_path: None,
            max_concurrency: 2,
            cache_ttl_secs: 60,
            serve_api: false,
            api_port: 0,
            recompute: None,
        }
    }

    async fn pipeline() -> (Pipeline, SnapshotRepository) {
        pipeline_on(test_pool().await)
    }

    fn pipeline_on(pool: SqlitePool) -> (Pipeline, SnapshotRepository) {
        let repo = SnapshotRepository::new(pool);
        let p = Pipeline::new(
            &config(),
            repo.clone(),
            SnapshotCache::new(Duration::from_secs(60)),
            EntityLocks::new(),
            Arc::new(IdentifierAliases::default()),
        );
        (p, repo)
    }

    fn entities() -> Vec<Entity> {
        vec![
            Entity {
                id: "op-01".into(),
                name: "Romance Dawn Booster Box".into(),
                identifier_pattern: Some("OP-01".into()),
            },
            Entity {
                id: "op-02".into(),
                name: "Paramount War Booster Box".into(),
                identifier_pattern: Some("OP-02".into()),
            },
        ]
    }

    fn obs(kind: ObservationKind, seller: &str, price: f64, sold_on: Option<NaiveDate>) -> RawObservation {
        RawObservation {
            entity_id: "op-01".into(),
            marketplace: "tcgplayer".into(),
            kind,
            price: Some(price),
            shipping: None,
            quantity: Some(1),
            title: "Romance Dawn Booster Box".into(),
            description: None,
            seller: Some(seller.into()),
            native_id: None,
            sold_on,
            lot_size: None,
        }
    }

    fn day1_batch() -> Batch {
        Batch {
            entities: entities(),
            observations: vec![
                obs(ObservationKind::Listing, "a", 100.0, None),
                obs(ObservationKind::Listing, "b", 110.0, None),
                obs(ObservationKind::Listing, "c", 150.0, None),
                obs(ObservationKind::Sale, "z", 105.0, Some(day(10))),
            ],
            source_summaries: vec![],
        }
    }

    fn day2_batch() -> Batch {
        Batch {
            entities: entities(),
            observations: vec![
                obs(ObservationKind::Listing, "a", 100.0, None),
                obs(ObservationKind::Listing, "b", 115.0, None),
                obs(ObservationKind::Listing, "d", 108.0, None),
            ],
            source_summaries: vec![],
        }
    }

    fn two_entity_batch() -> Batch {
        let mut op02_a = obs(ObservationKind::Listing, "p", 200.0, None);
        op02_a.entity_id = "op-02".into();
        let mut op02_b = obs(ObservationKind::Listing, "q", 210.0, None);
        op02_b.entity_id = "op-02".into();
        Batch {
            entities: entities(),
            observations: vec![obs(ObservationKind::Listing, "a", 100.0, None), op02_a, op02_b],
            source_summaries: vec![],
        }
    }

    /// A row the store cannot decode, as left behind by an older writer.
    async fn insert_undecodable_row(pool: &SqlitePool, entity_id: &str, date: NaiveDate) {
        sqlx::query(
            "INSERT INTO daily_snapshots (entity_id, date, floor_price, updated_at) VALUES (?, ?, 'n/a', 0)",
        )
        .bind(entity_id)
        .bind(date)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_builds_snapshot_and_index() {
        let (p, repo) = pipeline().await;
        let summary = p.run_batch(day(10), day1_batch()).await.unwrap();

        assert_eq!((summary.processed, summary.skipped, summary.failed), (1, 1, 0));
        assert_eq!(summary.reconcile.new_listings, 3);
        assert_eq!(summary.reconcile.new_sales, 1);
        assert!(summary.index_computed);
        assert!(!summary.index_partial);

        let snap = repo.latest_on_or_before("op-01", day(10)).await.unwrap().unwrap();
        assert_eq!(snap.floor_price, Some(100.0));
        assert_eq!(snap.boxes_sold_today, Some(1));
        assert_eq!(snap.boxes_added_today, Some(3));
        assert_eq!(snap.listings_within_20pct, Some(2));
        assert_eq!(snap.total_listings, Some(3));
        assert_eq!(snap.daily_volume_usd, Some(105.0));
        assert_eq!(snap.valid_data_days, 1);
        assert_eq!(snap.boxes_sold_30d_avg, None);

        // op-02 had no data and keeps no snapshot
        assert!(repo.history("op-02").await.unwrap().is_empty());

        let index = repo.latest_index().await.unwrap().unwrap();
        assert_eq!(index.index_value, 100.0);
        assert_eq!(index.entities_included, 1);
        assert_eq!(index.change_1d_pct, None);
    }

    #[tokio::test]
    async fn rerunning_a_date_upserts_identical_snapshot() {
        let (p, repo) = pipeline().await;
        p.run_batch(day(10), day1_batch()).await.unwrap();
        let first = repo.history("op-01").await.unwrap();

        let again = p.run_batch(day(10), day1_batch()).await.unwrap();
        let second = repo.history("op-01").await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(again.reconcile.new_listings, 3);
        assert_eq!(repo.index_history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn next_day_reconciles_against_ledger() {
        let (p, repo) = pipeline().await;
        p.run_batch(day(10), day1_batch()).await.unwrap();
        let summary = p.run_batch(day(11), day2_batch()).await.unwrap();

        assert_eq!(summary.reconcile.new_listings, 1);
        assert_eq!(summary.reconcile.updated_listings, 1);
        assert_eq!(summary.reconcile.duplicate_listings, 1);

        let snap = repo.latest_on_or_before("op-01", day(11)).await.unwrap().unwrap();
        assert_eq!(snap.date, day(11));
        assert_eq!(snap.boxes_added_today, Some(1));
        assert_eq!(snap.floor_price, Some(100.0));
        assert_eq!(snap.floor_price_1d_change_pct, Some(0.0));
        assert_eq!(snap.valid_data_days, 2);

        let index = repo.latest_index().await.unwrap().unwrap();
        assert_eq!(index.date, day(11));
        assert_eq!(index.change_1d_pct, Some(0.0));
    }

    #[tokio::test]
    async fn recompute_range_rewrites_stored_dates() {
        let (p, repo) = pipeline().await;
        p.run_batch(day(10), day1_batch()).await.unwrap();
        p.run_batch(day(11), day2_batch()).await.unwrap();
        let before = repo.history("op-01").await.unwrap();

        assert_eq!(p.recompute_range("op-01", day(1), day(31)).await.unwrap(), 2);
        assert_eq!(p.recompute_range("op-01", day(11), day(11)).await.unwrap(), 1);
        assert_eq!(repo.history("op-01").await.unwrap(), before);
        assert!(p.recompute_range("op-01", day(12), day(11)).await.is_err());
    }

    #[tokio::test]
    async fn unreadable_history_fails_entity_and_keeps_snapshot() {
        let pool = test_pool().await;
        let (p, repo) = pipeline_on(pool.clone());
        p.run_batch(day(10), day1_batch()).await.unwrap();
        p.run_batch(day(11), day2_batch()).await.unwrap();
        let before = repo.latest_on_or_before("op-01", day(11)).await.unwrap().unwrap();
        assert_eq!(before.valid_data_days, 2);

        insert_undecodable_row(&pool, "op-01", day(5)).await;
        assert!(repo.history("op-01").await.is_err());

        let summary = p.run_batch(day(11), day2_batch()).await.unwrap();
        assert_eq!((summary.processed, summary.failed), (0, 1));
        assert_eq!(summary.failures[0].entity_id, "op-01");

        let after = repo.latest_on_or_before("op-01", day(11)).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn one_failing_entity_yields_partial_index() {
        let pool = test_pool().await;
        let (p, repo) = pipeline_on(pool.clone());
        let first = p.run_batch(day(10), two_entity_batch()).await.unwrap();
        assert_eq!((first.processed, first.failed), (2, 0));
        p.run_batch(day(11), two_entity_batch()).await.unwrap();
        let op02_before = repo.latest_on_or_before("op-02", day(11)).await.unwrap().unwrap();

        insert_undecodable_row(&pool, "op-02", day(5)).await;
        let summary = p.run_batch(day(12), two_entity_batch()).await.unwrap();

        assert_eq!((summary.processed, summary.skipped, summary.failed), (1, 0, 1));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].entity_id, "op-02");
        assert!(summary.failures[0].reason.contains("history unavailable"));
        assert!(summary.index_computed);
        assert!(summary.index_partial);

        // op-01 moved on; op-02 keeps its last good snapshot.
        let op01 = repo.latest_on_or_before("op-01", day(12)).await.unwrap().unwrap();
        assert_eq!(op01.date, day(12));
        let op02_after = repo.latest_on_or_before("op-02", day(12)).await.unwrap().unwrap();
        assert_eq!(op02_after, op02_before);

        let index = repo.latest_index().await.unwrap().unwrap();
        assert_eq!(index.date, day(12));
        assert_eq!(index.entities_included, 2);
        assert_eq!(index.index_value, 300.0);
    }

    #[tokio::test]
    async fn empty_store_and_batch_is_fatal() {
        let (p, _repo) = pipeline().await;
        let err = p.run_batch(day(10), Batch::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NoEntityData));
    }
}
