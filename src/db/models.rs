//! Database row types matching `migrations/`. Integer counts are stored as
//! SQLite INTEGER (i64) and narrowed to the domain's u32 on the way out.

use chrono::NaiveDate;

use crate::error::AppError;
use crate::types::{
    DailySnapshot, Entity, FearGreedBreakdown, FearGreedLabel, Liquidity, MarketIndexSnapshot,
    Mover, Sentiment,
};

#[derive(Debug, sqlx::FromRow)]
pub struct EntityRow {
    pub id: String,
    pub name: String,
    pub identifier_pattern: Option<String>,
}

impl From<EntityRow> for Entity {
    fn from(r: EntityRow) -> Self {
        Entity {
            id: r.id,
            name: r.name,
            identifier_pattern: r.identifier_pattern,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SnapshotRow {
    pub entity_id: String,
    pub date: NaiveDate,
    pub floor_price: Option<f64>,
    pub boxes_sold_today: Option<i64>,
    pub boxes_added_today: Option<i64>,
    pub active_listings_count: Option<i64>,
    pub listings_within_10pct: Option<i64>,
    pub listings_within_20pct: Option<i64>,
    pub total_listings: Option<i64>,
    pub daily_volume_usd: Option<f64>,
    pub floor_price_1d_change_pct: Option<f64>,
    pub floor_price_7d_change_pct: Option<f64>,
    pub floor_price_30d_change_pct: Option<f64>,
    pub volume_7d: Option<f64>,
    pub volume_30d: Option<f64>,
    pub volume_ema: Option<f64>,
    pub boxes_sold_30d_avg: Option<f64>,
    pub sales_rate_ema: Option<f64>,
    pub avg_boxes_added_30d: Option<f64>,
    pub boxes_added_ema_short: Option<f64>,
    pub boxes_added_ema_long: Option<f64>,
    pub liquidity: Option<String>,
    pub days_to_20pct_increase: Option<f64>,
    pub expected_days_to_sell: Option<f64>,
    pub valid_data_days: i64,
    pub days_until_30d_metrics: i64,
}

fn narrow(v: Option<i64>) -> Option<u32> {
    v.and_then(|n| u32::try_from(n).ok())
}

impl From<SnapshotRow> for DailySnapshot {
    fn from(r: SnapshotRow) -> Self {
        DailySnapshot {
            entity_id: r.entity_id,
            date: r.date,
            floor_price: r.floor_price,
            boxes_sold_today: narrow(r.boxes_sold_today),
            boxes_added_today: narrow(r.boxes_added_today),
            active_listings_count: narrow(r.active_listings_count),
            listings_within_10pct: narrow(r.listings_within_10pct),
            listings_within_20pct: narrow(r.listings_within_20pct),
            total_listings: narrow(r.total_listings),
            daily_volume_usd: r.daily_volume_usd,
            floor_price_1d_change_pct: r.floor_price_1d_change_pct,
            floor_price_7d_change_pct: r.floor_price_7d_change_pct,
            floor_price_30d_change_pct: r.floor_price_30d_change_pct,
            volume_7d: r.volume_7d,
            volume_30d: r.volume_30d,
            volume_ema: r.volume_ema,
            boxes_sold_30d_avg: r.boxes_sold_30d_avg,
            sales_rate_ema: r.sales_rate_ema,
            avg_boxes_added_30d: r.avg_boxes_added_30d,
            boxes_added_ema_short: r.boxes_added_ema_short,
            boxes_added_ema_long: r.boxes_added_ema_long,
            liquidity: r.liquidity.as_deref().and_then(Liquidity::parse),
            days_to_20pct_increase: r.days_to_20pct_increase,
            expected_days_to_sell: r.expected_days_to_sell,
            valid_data_days: narrow(Some(r.valid_data_days)).unwrap_or(0),
            days_until_30d_metrics: narrow(Some(r.days_until_30d_metrics)).unwrap_or(0),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct IndexRow {
    pub date: NaiveDate,
    pub index_value: f64,
    pub change_1d_pct: Option<f64>,
    pub change_7d_pct: Option<f64>,
    pub change_30d_pct: Option<f64>,
    pub sentiment: String,
    pub fear_greed_score: f64,
    pub fg_price_momentum: f64,
    pub fg_volume_momentum: f64,
    pub fg_listing_trend: f64,
    pub fg_sales_velocity: f64,
    pub entities_included: i64,
    pub gainers: i64,
    pub losers: i64,
    pub unchanged: i64,
    /// JSON-encoded `Mover`
    pub top_gainer: Option<String>,
    pub top_loser: Option<String>,
    pub total_daily_volume: f64,
    pub total_volume_30d: f64,
    pub total_active_listings: i64,
    pub total_boxes_added: i64,
}

fn decode_mover(raw: Option<String>) -> Result<Option<Mover>, AppError> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(AppError::from)
}

impl TryFrom<IndexRow> for MarketIndexSnapshot {
    type Error = AppError;

    fn try_from(r: IndexRow) -> Result<Self, Self::Error> {
        let sentiment = Sentiment::parse(&r.sentiment).ok_or_else(|| {
            AppError::Database(sqlx::Error::Decode(
                format!("unknown sentiment {:?} for {}", r.sentiment, r.date).into(),
            ))
        })?;
        let count = |v: i64| narrow(Some(v)).unwrap_or(0);

        Ok(MarketIndexSnapshot {
            date: r.date,
            index_value: r.index_value,
            change_1d_pct: r.change_1d_pct,
            change_7d_pct: r.change_7d_pct,
            change_30d_pct: r.change_30d_pct,
            sentiment,
            fear_greed_score: r.fear_greed_score,
            fear_greed_label: FearGreedLabel::from_score(r.fear_greed_score),
            fear_greed: FearGreedBreakdown {
                price_momentum: r.fg_price_momentum,
                volume_momentum: r.fg_volume_momentum,
                listing_trend: r.fg_listing_trend,
                sales_velocity: r.fg_sales_velocity,
            },
            entities_included: count(r.entities_included),
            gainers: count(r.gainers),
            losers: count(r.losers),
            unchanged: count(r.unchanged),
            top_gainer: decode_mover(r.top_gainer)?,
            top_loser: decode_mover(r.top_loser)?,
            total_daily_volume: r.total_daily_volume,
            total_volume_30d: r.total_volume_30d,
            total_active_listings: count(r.total_active_listings),
            total_boxes_added: count(r.total_boxes_added),
        })
    }
}
