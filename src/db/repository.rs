use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::db::models::{EntityRow, IndexRow, SnapshotRow};
use crate::error::Result;
use crate::ingest::KnownListing;
use crate::types::{DailySnapshot, Entity, MarketIndexSnapshot};

const SNAPSHOT_COLUMNS: &str = r#"
    entity_id, date, floor_price, boxes_sold_today, boxes_added_today,
    active_listings_count, listings_within_10pct, listings_within_20pct, total_listings,
    daily_volume_usd, floor_price_1d_change_pct, floor_price_7d_change_pct,
    floor_price_30d_change_pct, volume_7d, volume_30d, volume_ema, boxes_sold_30d_avg,
    sales_rate_ema, avg_boxes_added_30d, boxes_added_ema_short, boxes_added_ema_long,
    liquidity, days_to_20pct_increase, expected_days_to_sell, valid_data_days,
    days_until_30d_metrics
"#;

const INDEX_COLUMNS: &str = r#"
    date, index_value, change_1d_pct, change_7d_pct, change_30d_pct, sentiment,
    fear_greed_score, fg_price_momentum, fg_volume_momentum, fg_listing_trend,
    fg_sales_velocity, entities_included, gainers, losers, unchanged, top_gainer,
    top_loser, total_daily_volume, total_volume_30d, total_active_listings, total_boxes_added
"#;

/// SQLite-backed snapshot store. Every write is keyed on the table's natural
/// key so concurrent workers and re-runs never create a second row.
#[derive(Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (id, name, identifier_pattern)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                identifier_pattern = excluded.identifier_pattern
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.identifier_pattern)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_entities(&self) -> Result<Vec<Entity>> {
        let rows = sqlx::query_as::<_, EntityRow>(
            "SELECT id, name, identifier_pattern FROM entities ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Entity::from).collect())
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            "SELECT id, name, identifier_pattern FROM entities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Entity::from))
    }

    // -----------------------------------------------------------------------
    // Daily snapshots
    // -----------------------------------------------------------------------

    pub async fn upsert_snapshot(&self, s: &DailySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_snapshots (
                entity_id, date, floor_price, boxes_sold_today, boxes_added_today,
                active_listings_count, listings_within_10pct, listings_within_20pct,
                total_listings, daily_volume_usd, floor_price_1d_change_pct,
                floor_price_7d_change_pct, floor_price_30d_change_pct, volume_7d, volume_30d,
                volume_ema, boxes_sold_30d_avg, sales_rate_ema, avg_boxes_added_30d,
                boxes_added_ema_short, boxes_added_ema_long, liquidity, days_to_20pct_increase,
                expected_days_to_sell, valid_data_days, days_until_30d_metrics, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity_id, date) DO UPDATE SET
                floor_price = excluded.floor_price,
                boxes_sold_today = excluded.boxes_sold_today,
                boxes_added_today = excluded.boxes_added_today,
                active_listings_count = excluded.active_listings_count,
                listings_within_10pct = excluded.listings_within_10pct,
                listings_within_20pct = excluded.listings_within_20pct,
                total_listings = excluded.total_listings,
                daily_volume_usd = excluded.daily_volume_usd,
                floor_price_1d_change_pct = excluded.floor_price_1d_change_pct,
                floor_price_7d_change_pct = excluded.floor_price_7d_change_pct,
                floor_price_30d_change_pct = excluded.floor_price_30d_change_pct,
                volume_7d = excluded.volume_7d,
                volume_30d = excluded.volume_30d,
                volume_ema = excluded.volume_ema,
                boxes_sold_30d_avg = excluded.boxes_sold_30d_avg,
                sales_rate_ema = excluded.sales_rate_ema,
                avg_boxes_added_30d = excluded.avg_boxes_added_30d,
                boxes_added_ema_short = excluded.boxes_added_ema_short,
                boxes_added_ema_long = excluded.boxes_added_ema_long,
                liquidity = excluded.liquidity,
                days_to_20pct_increase = excluded.days_to_20pct_increase,
                expected_days_to_sell = excluded.expected_days_to_sell,
                valid_data_days = excluded.valid_data_days,
                days_until_30d_metrics = excluded.days_until_30d_metrics,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&s.entity_id)
        .bind(s.date)
        .bind(s.floor_price)
        .bind(s.boxes_sold_today.map(i64::from))
        .bind(s.boxes_added_today.map(i64::from))
        .bind(s.active_listings_count.map(i64::from))
        .bind(s.listings_within_10pct.map(i64::from))
        .bind(s.listings_within_20pct.map(i64::from))
        .bind(s.total_listings.map(i64::from))
        .bind(s.daily_volume_usd)
        .bind(s.floor_price_1d_change_pct)
        .bind(s.floor_price_7d_change_pct)
        .bind(s.floor_price_30d_change_pct)
        .bind(s.volume_7d)
        .bind(s.volume_30d)
        .bind(s.volume_ema)
        .bind(s.boxes_sold_30d_avg)
        .bind(s.sales_rate_ema)
        .bind(s.avg_boxes_added_30d)
        .bind(s.boxes_added_ema_short)
        .bind(s.boxes_added_ema_long)
        .bind(s.liquidity.map(|l| l.to_string()))
        .bind(s.days_to_20pct_increase)
        .bind(s.expected_days_to_sell)
        .bind(i64::from(s.valid_data_days))
        .bind(i64::from(s.days_until_30d_metrics))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full stored history for an entity, oldest first.
    pub async fn history(&self, entity_id: &str) -> Result<Vec<DailySnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM daily_snapshots WHERE entity_id = ? ORDER BY date ASC"
        );
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DailySnapshot::from).collect())
    }

    /// Newest first, at most `limit` rows.
    pub async fn recent_snapshots(&self, entity_id: &str, limit: i64) -> Result<Vec<DailySnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM daily_snapshots WHERE entity_id = ? ORDER BY date DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(entity_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DailySnapshot::from).collect())
    }

    pub async fn latest_on_or_before(
        &self,
        entity_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailySnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM daily_snapshots
             WHERE entity_id = ? AND date <= ? ORDER BY date DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(entity_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(DailySnapshot::from))
    }

    /// Stored snapshot dates in `[from, to]`, ascending.
    pub async fn snapshot_dates(
        &self,
        entity_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT date FROM daily_snapshots WHERE entity_id = ? AND date >= ? AND date <= ? ORDER BY date ASC",
        )
        .bind(entity_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(dates)
    }

    // -----------------------------------------------------------------------
    // Market index
    // -----------------------------------------------------------------------

    pub async fn upsert_index(&self, idx: &MarketIndexSnapshot) -> Result<()> {
        let top_gainer = idx.top_gainer.as_ref().map(serde_json::to_string).transpose()?;
        let top_loser = idx.top_loser.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO market_index_snapshots (
                date, index_value, change_1d_pct, change_7d_pct, change_30d_pct, sentiment,
                fear_greed_score, fear_greed_label, fg_price_momentum, fg_volume_momentum,
                fg_listing_trend, fg_sales_velocity, entities_included, gainers, losers,
                unchanged, top_gainer, top_loser, total_daily_volume, total_volume_30d,
                total_active_listings, total_boxes_added, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                index_value = excluded.index_value,
                change_1d_pct = excluded.change_1d_pct,
                change_7d_pct = excluded.change_7d_pct,
                change_30d_pct = excluded.change_30d_pct,
                sentiment = excluded.sentiment,
                fear_greed_score = excluded.fear_greed_score,
                fear_greed_label = excluded.fear_greed_label,
                fg_price_momentum = excluded.fg_price_momentum,
                fg_volume_momentum = excluded.fg_volume_momentum,
                fg_listing_trend = excluded.fg_listing_trend,
                fg_sales_velocity = excluded.fg_sales_velocity,
                entities_included = excluded.entities_included,
                gainers = excluded.gainers,
                losers = excluded.losers,
                unchanged = excluded.unchanged,
                top_gainer = excluded.top_gainer,
                top_loser = excluded.top_loser,
                total_daily_volume = excluded.total_daily_volume,
                total_volume_30d = excluded.total_volume_30d,
                total_active_listings = excluded.total_active_listings,
                total_boxes_added = excluded.total_boxes_added,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(idx.date)
        .bind(idx.index_value)
        .bind(idx.change_1d_pct)
        .bind(idx.change_7d_pct)
        .bind(idx.change_30d_pct)
        .bind(idx.sentiment.to_string())
        .bind(idx.fear_greed_score)
        .bind(idx.fear_greed_label.to_string())
        .bind(idx.fear_greed.price_momentum)
        .bind(idx.fear_greed.volume_momentum)
        .bind(idx.fear_greed.listing_trend)
        .bind(idx.fear_greed.sales_velocity)
        .bind(i64::from(idx.entities_included))
        .bind(i64::from(idx.gainers))
        .bind(i64::from(idx.losers))
        .bind(i64::from(idx.unchanged))
        .bind(top_gainer)
        .bind(top_loser)
        .bind(idx.total_daily_volume)
        .bind(idx.total_volume_30d)
        .bind(i64::from(idx.total_active_listings))
        .bind(i64::from(idx.total_boxes_added))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored index values in `[from, to]`, for change-percentage lookups.
    pub async fn index_values(&self, from: NaiveDate, to: NaiveDate) -> Result<BTreeMap<NaiveDate, f64>> {
        let rows = sqlx::query_as::<_, (NaiveDate, f64)>(
            "SELECT date, index_value FROM market_index_snapshots WHERE date >= ? AND date <= ?",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn latest_index(&self) -> Result<Option<MarketIndexSnapshot>> {
        let sql = format!(
            "SELECT {INDEX_COLUMNS} FROM market_index_snapshots ORDER BY date DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, IndexRow>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MarketIndexSnapshot::try_from).transpose()
    }

    /// Newest first, at most `limit` rows.
    pub async fn index_history(&self, limit: i64) -> Result<Vec<MarketIndexSnapshot>> {
        let sql = format!(
            "SELECT {INDEX_COLUMNS} FROM market_index_snapshots ORDER BY date DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, IndexRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(MarketIndexSnapshot::try_from).collect()
    }

    // -----------------------------------------------------------------------
    // Reconciliation ledger
    // -----------------------------------------------------------------------

    /// Listings seen on dates strictly before `date`; the most recent price
    /// wins for a key seen on several days.
    pub async fn known_listings_before(
        &self,
        entity_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<KnownListing>> {
        let rows = sqlx::query_as::<_, (String, f64)>(
            "SELECT listing_key, price FROM seen_listings
             WHERE entity_id = ? AND date < ? ORDER BY date ASC",
        )
        .bind(entity_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        let latest: HashMap<String, f64> = rows.into_iter().collect();
        let mut known: Vec<KnownListing> = latest
            .into_iter()
            .map(|(key, price)| KnownListing { key, price })
            .collect();
        known.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(known)
    }

    pub async fn known_sale_keys_before(
        &self,
        entity_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT sale_key FROM seen_sales WHERE entity_id = ? AND date < ?",
        )
        .bind(entity_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys.into_iter().collect())
    }

    /// Replace the ledger rows for one (entity, date) in a single transaction.
    pub async fn replace_seen(
        &self,
        entity_id: &str,
        date: NaiveDate,
        listings: &[KnownListing],
        sale_keys: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM seen_listings WHERE entity_id = ? AND date = ?")
            .bind(entity_id)
            .bind(date)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM seen_sales WHERE entity_id = ? AND date = ?")
            .bind(entity_id)
            .bind(date)
            .execute(&mut *tx)
            .await?;

        for listing in listings {
            sqlx::query(
                r#"
                INSERT INTO seen_listings (entity_id, date, listing_key, price)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(entity_id, date, listing_key) DO UPDATE SET price = excluded.price
                "#,
            )
            .bind(entity_id)
            .bind(date)
            .bind(&listing.key)
            .bind(listing.price)
            .execute(&mut *tx)
            .await?;
        }
        for key in sale_keys {
            sqlx::query("INSERT OR IGNORE INTO seen_sales (entity_id, date, sale_key) VALUES (?, ?, ?)")
                .bind(entity_id)
                .bind(date)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::{FearGreedBreakdown, FearGreedLabel, Liquidity, Mover, Sentiment};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn snapshot(entity_id: &str, date: NaiveDate, floor: f64) -> DailySnapshot {
        let mut s = DailySnapshot::empty(entity_id, date);
        s.floor_price = Some(floor);
        s.boxes_sold_today = Some(2);
        s.active_listings_count = Some(40);
        s.liquidity = Some(Liquidity::Medium);
        s.valid_data_days = 3;
        s.days_until_30d_metrics = 27;
        s
    }

    fn index(date: NaiveDate, value: f64) -> MarketIndexSnapshot {
        MarketIndexSnapshot {
            date,
            index_value: value,
            change_1d_pct: Some(1.5),
            change_7d_pct: None,
            change_30d_pct: None,
            sentiment: Sentiment::Neutral,
            fear_greed_score: 52.0,
            fear_greed_label: FearGreedLabel::Neutral,
            fear_greed: FearGreedBreakdown {
                price_momentum: 60.0,
                volume_momentum: 50.0,
                listing_trend: 40.0,
                sales_velocity: 58.0,
            },
            entities_included: 2,
            gainers: 1,
            losers: 0,
            unchanged: 1,
            top_gainer: Some(Mover {
                entity_id: "op-01".into(),
                name: "Romance Dawn".into(),
                change_pct: 3.0,
            }),
            top_loser: None,
            total_daily_volume: 420.0,
            total_volume_30d: 9000.0,
            total_active_listings: 55,
            total_boxes_added: 4,
        }
    }

    #[tokio::test]
    async fn snapshot_upsert_is_idempotent() {
        let repo = SnapshotRepository::new(test_pool().await);
        let s = snapshot("op-01", day(3), 101.25);

        repo.upsert_snapshot(&s).await.unwrap();
        let first = repo.history("op-01").await.unwrap();
        repo.upsert_snapshot(&s).await.unwrap();
        let second = repo.history("op-01").await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(second[0], s);
    }

    #[tokio::test]
    async fn upsert_replaces_fields_for_same_key() {
        let repo = SnapshotRepository::new(test_pool().await);
        repo.upsert_snapshot(&snapshot("op-01", day(3), 100.0)).await.unwrap();
        repo.upsert_snapshot(&snapshot("op-01", day(3), 95.0)).await.unwrap();

        let history = repo.history("op-01").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].floor_price, Some(95.0));
    }

    #[tokio::test]
    async fn history_is_ascending_and_latest_respects_cutoff() {
        let repo = SnapshotRepository::new(test_pool().await);
        for (d, floor) in [(5, 105.0), (1, 101.0), (3, 103.0)] {
            repo.upsert_snapshot(&snapshot("op-02", day(d), floor)).await.unwrap();
        }
        repo.upsert_snapshot(&snapshot("op-03", day(4), 1.0)).await.unwrap();

        let dates: Vec<_> = repo.history("op-02").await.unwrap().iter().map(|s| s.date).collect();
        assert_eq!(dates, vec![day(1), day(3), day(5)]);

        let latest = repo.latest_on_or_before("op-02", day(4)).await.unwrap().unwrap();
        assert_eq!(latest.date, day(3));
        let before_any = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        assert!(repo.latest_on_or_before("op-02", before_any).await.unwrap().is_none());

        let recent = repo.recent_snapshots("op-02", 2).await.unwrap();
        assert_eq!(recent.iter().map(|s| s.date).collect::<Vec<_>>(), vec![day(5), day(3)]);

        assert_eq!(repo.snapshot_dates("op-02", day(2), day(5)).await.unwrap(), vec![day(3), day(5)]);
    }

    #[tokio::test]
    async fn index_round_trips_through_store() {
        let repo = SnapshotRepository::new(test_pool().await);
        repo.upsert_index(&index(day(1), 200.0)).await.unwrap();
        repo.upsert_index(&index(day(2), 210.0)).await.unwrap();
        repo.upsert_index(&index(day(2), 212.5)).await.unwrap();

        let latest = repo.latest_index().await.unwrap().unwrap();
        assert_eq!(latest, index(day(2), 212.5));

        let values = repo.index_values(day(1), day(30)).await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values.get(&day(1)), Some(&200.0));

        assert_eq!(repo.index_history(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ledger_reads_only_earlier_days() {
        let repo = SnapshotRepository::new(test_pool().await);
        let k = |key: &str, price: f64| KnownListing { key: key.into(), price };

        repo.replace_seen("op-01", day(1), &[k("a|1|ebay", 100.0)], &["s1".into()]).await.unwrap();
        repo.replace_seen("op-01", day(2), &[k("a|1|ebay", 105.0), k("b|1|ebay", 90.0)], &["s2".into()])
            .await
            .unwrap();
        repo.replace_seen("op-01", day(3), &[k("c|1|ebay", 80.0)], &["s3".into()]).await.unwrap();

        let known = repo.known_listings_before("op-01", day(3)).await.unwrap();
        assert_eq!(known, vec![k("a|1|ebay", 105.0), k("b|1|ebay", 90.0)]);

        let sales = repo.known_sale_keys_before("op-01", day(3)).await.unwrap();
        assert_eq!(sales, HashSet::from(["s1".to_string(), "s2".to_string()]));

        // Re-running day 2 replaces its rows.
        repo.replace_seen("op-01", day(2), &[], &[]).await.unwrap();
        let known = repo.known_listings_before("op-01", day(3)).await.unwrap();
        assert_eq!(known, vec![k("a|1|ebay", 100.0)]);
    }

    #[tokio::test]
    async fn entities_upsert_and_list() {
        let repo = SnapshotRepository::new(test_pool().await);
        let mut e = Entity {
            id: "op-01".into(),
            name: "Romance Dawn".into(),
            identifier_pattern: Some("OP-01".into()),
        };
        repo.upsert_entity(&e).await.unwrap();
        e.name = "Romance Dawn Booster Box".into();
        repo.upsert_entity(&e).await.unwrap();

        assert_eq!(repo.list_entities().await.unwrap(), vec![e.clone()]);
        assert_eq!(repo.get_entity("op-01").await.unwrap(), Some(e));
        assert_eq!(repo.get_entity("missing").await.unwrap(), None);
    }
}
