use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A trackable sealed product (one box SKU/variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    /// Set-code style token used to match listing titles, e.g. "OP-01".
    #[serde(default)]
    pub identifier_pattern: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw observations (ephemeral, produced by external collectors)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Listing,
    Sale,
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationKind::Listing => write!(f, "listing"),
            ObservationKind::Sale => write!(f, "sale"),
        }
    }
}

/// One listing or sale scraped from a marketplace.
///
/// `price` and `quantity` stay optional so malformed records survive
/// deserialization and are rejected (and counted) by the filter instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub entity_id: String,
    pub marketplace: String,
    pub kind: ObservationKind,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub shipping: Option<f64>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
    #[serde(default)]
    pub native_id: Option<String>,
    /// Sales only.
    #[serde(default)]
    pub sold_on: Option<NaiveDate>,
    /// Boxes bundled in one listing, when the collector already knows it.
    #[serde(default)]
    pub lot_size: Option<u32>,
}

impl RawObservation {
    /// Item price plus shipping. None when the price is missing.
    pub fn total_price(&self) -> Option<f64> {
        self.price.map(|p| p + self.shipping.unwrap_or(0.0).max(0.0))
    }

    pub fn marketplace_key(&self) -> String {
        self.marketplace.trim().to_lowercase()
    }
}

/// Pre-aggregated daily figures from a source that only reports counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub entity_id: String,
    pub marketplace: String,
    #[serde(default)]
    pub floor_price: Option<f64>,
    #[serde(default)]
    pub sold_today: Option<u32>,
    #[serde(default)]
    pub added_today: Option<u32>,
    #[serde(default)]
    pub active_listings: Option<u32>,
}

// ---------------------------------------------------------------------------
// Liquidity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    /// expected time-to-sale < 5 days
    High,
    /// 5–15 days inclusive
    Medium,
    /// > 15 days
    Low,
}

impl Liquidity {
    pub fn from_days_to_sell(days: f64) -> Self {
        use crate::config::liquidity_thresholds::*;
        if days < HIGH_BELOW {
            Liquidity::High
        } else if days > LOW_ABOVE {
            Liquidity::Low
        } else {
            Liquidity::Medium
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Liquidity::High),
            "medium" => Some(Liquidity::Medium),
            "low" => Some(Liquidity::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Liquidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Liquidity::High => "high",
            Liquidity::Medium => "medium",
            Liquidity::Low => "low",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// DailySnapshot
// ---------------------------------------------------------------------------

/// Canonical per-(entity, date) state. Raw fields come from the aggregator;
/// rolling fields are filled by the rolling metrics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub entity_id: String,
    pub date: NaiveDate,

    // --- raw / observed ---
    pub floor_price: Option<f64>,
    pub boxes_sold_today: Option<u32>,
    pub boxes_added_today: Option<u32>,
    /// Listings within 20% of the floor.
    pub active_listings_count: Option<u32>,
    pub listings_within_10pct: Option<u32>,
    pub listings_within_20pct: Option<u32>,
    pub total_listings: Option<u32>,
    /// Units sold × unit price, summed across sources.
    pub daily_volume_usd: Option<f64>,

    // --- rolling / derived ---
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
    pub liquidity: Option<Liquidity>,
    pub days_to_20pct_increase: Option<f64>,
    pub expected_days_to_sell: Option<f64>,

    // --- maturity ---
    pub valid_data_days: u32,
    pub days_until_30d_metrics: u32,
}

impl DailySnapshot {
    /// A snapshot with no observed or derived data.
    pub fn empty(entity_id: &str, date: NaiveDate) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            date,
            floor_price: None,
            boxes_sold_today: None,
            boxes_added_today: None,
            active_listings_count: None,
            listings_within_10pct: None,
            listings_within_20pct: None,
            total_listings: None,
            daily_volume_usd: None,
            floor_price_1d_change_pct: None,
            floor_price_7d_change_pct: None,
            floor_price_30d_change_pct: None,
            volume_7d: None,
            volume_30d: None,
            volume_ema: None,
            boxes_sold_30d_avg: None,
            sales_rate_ema: None,
            avg_boxes_added_30d: None,
            boxes_added_ema_short: None,
            boxes_added_ema_long: None,
            liquidity: None,
            days_to_20pct_increase: None,
            expected_days_to_sell: None,
            valid_data_days: 0,
            days_until_30d_metrics: crate::config::maturity::GATE_DAYS,
        }
    }

    /// A day counts toward maturity once a floor price was observed.
    pub fn has_usable_data(&self) -> bool {
        self.floor_price.is_some_and(|p| p > 0.0)
    }
}

// ---------------------------------------------------------------------------
// Market index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BULLISH" => Some(Sentiment::Bullish),
            "BEARISH" => Some(Sentiment::Bearish),
            "NEUTRAL" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sentiment::Bullish => "BULLISH",
            Sentiment::Bearish => "BEARISH",
            Sentiment::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FearGreedLabel {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl FearGreedLabel {
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            FearGreedLabel::ExtremeFear
        } else if score < 45.0 {
            FearGreedLabel::Fear
        } else if score <= 55.0 {
            FearGreedLabel::Neutral
        } else if score <= 75.0 {
            FearGreedLabel::Greed
        } else {
            FearGreedLabel::ExtremeGreed
        }
    }
}

impl std::fmt::Display for FearGreedLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FearGreedLabel::ExtremeFear => "EXTREME_FEAR",
            FearGreedLabel::Fear => "FEAR",
            FearGreedLabel::Neutral => "NEUTRAL",
            FearGreedLabel::Greed => "GREED",
            FearGreedLabel::ExtremeGreed => "EXTREME_GREED",
        };
        write!(f, "{s}")
    }
}

/// The four equally weighted components of the fear/greed score, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FearGreedBreakdown {
    pub price_momentum: f64,
    pub volume_momentum: f64,
    pub listing_trend: f64,
    pub sales_velocity: f64,
}

impl FearGreedBreakdown {
    pub fn score(&self) -> f64 {
        0.25 * self.price_momentum
            + 0.25 * self.volume_momentum
            + 0.25 * self.listing_trend
            + 0.25 * self.sales_velocity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub entity_id: String,
    pub name: String,
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIndexSnapshot {
    pub date: NaiveDate,
    pub index_value: f64,
    pub change_1d_pct: Option<f64>,
    pub change_7d_pct: Option<f64>,
    pub change_30d_pct: Option<f64>,
    pub sentiment: Sentiment,
    pub fear_greed_score: f64,
    pub fear_greed_label: FearGreedLabel,
    pub fear_greed: FearGreedBreakdown,
    pub entities_included: u32,
    pub gainers: u32,
    pub losers: u32,
    pub unchanged: u32,
    pub top_gainer: Option<Mover>,
    pub top_loser: Option<Mover>,
    pub total_daily_volume: f64,
    pub total_volume_30d: f64,
    pub total_active_listings: u32,
    pub total_boxes_added: u32,
}
