use chrono::NaiveDate;

use crate::error::{AppError, Result};

/// Default first day counted toward the data-maturity gate.
pub const DATA_EPOCH: &str = "2025-01-01";

/// Observations priced below `prior_floor * (1 - threshold)` are rejected.
pub const PRICE_FILTER_THRESHOLD: f64 = 0.25;

/// Marketplaces whose listing titles are free text and need fuzzy matching.
pub const FUZZY_MATCH_MARKETPLACES: &[&str] = &["ebay"];

/// Default number of entities processed concurrently.
pub const MAX_CONCURRENCY: usize = 8;

/// Default history cache TTL (seconds).
pub const CACHE_TTL_SECS: u64 = 300;

/// Entities whose history the snapshot cache holds at once
pub const CACHE_MAX_ENTRIES: u64 = 10_000;

/// Two listings at the same key whose prices differ by more than this are an update.
pub const LISTING_PRICE_TOLERANCE: f64 = 0.01;

/// Lot sizes above this are assumed to be pack counts ("24x packs"), not bundles.
pub const MAX_LOT_SIZE: u32 = 12;

/// Title/description keywords that mark a non-English or regional print.
pub const EXCLUDED_REGION_KEYWORDS: &[&str] = &[
    "japanese",
    "japan",
    "jpn",
    "korean",
    "chinese",
    "simplified",
    "german",
    "deutsch",
    "french",
    "italian",
    "spanish",
    "portuguese",
    "thai",
    "indonesian",
];

/// At least one of these must appear in a fuzzy-matched title.
pub const PRODUCT_TYPE_QUALIFIERS: &[&str] = &["box", "display"];

/// Entities whose names contain any of these are left out of the market index.
pub const INDEX_NAME_DENYLIST: &[&str] = &["test", "placeholder", "dummy", "sample"];

/// Data-maturity gate.
pub mod maturity {
    /// Valid data-days required before 30-day metrics are reported.
    pub const GATE_DAYS: u32 = 30;
}

/// Smoothing factors and windows for the rolling metrics engine.
pub mod rolling {
    pub const ADDED_EMA_SHORT_ALPHA: f64 = 0.25;
    pub const ADDED_EMA_LONG_ALPHA: f64 = 0.065;
    pub const SALES_EMA_ALPHA: f64 = 0.25;
    pub const VOLUME_EMA_ALPHA: f64 = 0.3;
    /// Entry count for the simple moving averages (sales, listings added).
    pub const SMA_ENTRIES: usize = 30;
    pub const VOLUME_SHORT_DAYS: i64 = 7;
    pub const VOLUME_LONG_DAYS: i64 = 30;
}

/// Supply-burn projections.
pub mod projection {
    /// Net burn at or below this is treated as stalled supply.
    pub const MIN_NET_BURN: f64 = 0.05;
    pub const MAX_DAYS_TO_20PCT: f64 = 180.0;
    pub const MIN_DAYS_TO_SELL: f64 = 1.0;
    pub const MAX_DAYS_TO_SELL: f64 = 365.0;
}

/// Expected-days-to-sell boundaries for the liquidity label.
pub mod liquidity_thresholds {
    /// Strictly below this is High.
    pub const HIGH_BELOW: f64 = 5.0;
    /// Strictly above this is Low.
    pub const LOW_ABOVE: f64 = 15.0;
}

/// Market index sentiment and fear/greed mapping.
pub mod sentiment_thresholds {
    /// 7-day index change (percent) needed for a directional label.
    pub const INDEX_7D_PCT: f64 = 2.0;
    /// 1-day floor change (percent) that counts as a move.
    pub const MOVER_PCT: f64 = 0.5;
    pub const PRICE_MOMENTUM_RANGE: (f64, f64) = (-5.0, 5.0);
    pub const VOLUME_MOMENTUM_RANGE: (f64, f64) = (-50.0, 50.0);
    pub const LISTING_TREND_RANGE: (f64, f64) = (-5.0, 5.0);
    pub const SALES_VELOCITY_RANGE: (f64, f64) = (0.0, 3.0);
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    /// Observation batch produced by the collectors (BATCH_PATH)
    pub batch_path: String,
    /// Date being processed (TARGET_DATE); None means "today" and is resolved in main.
    pub target_date: Option<NaiveDate>,
    /// First day counted toward the maturity gate (DATA_EPOCH)
    pub data_epoch: NaiveDate,
    pub filter: FilterConfig,
    /// Legacy → canonical identifier table (ALIASES_PATH)
    pub aliases_path: Option<String>,
    /// JSON snapshot archive used as the last history tier (ARCHIVE_PATH)
    pub archive_path: Option<String>,
    pub max_concurrency: usize,
    pub cache_ttl_secs: u64,
    pub serve_api: bool,
    pub api_port: u16,
    /// Operator back-dating run (RECOMPUTE_ENTITY / RECOMPUTE_FROM / RECOMPUTE_TO).
    /// When set, the batch is not processed.
    pub recompute: Option<RecomputeRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeRequest {
    pub entity_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Observation filter settings.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Only accept observations from this marketplace (MARKETPLACE_FILTER)
    pub marketplace: Option<String>,
    /// PRICE_FILTER_THRESHOLD
    pub price_filter_threshold: f64,
    /// FUZZY_MATCH_MARKETPLACES, comma-separated
    pub fuzzy_match_marketplaces: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            marketplace: None,
            price_filter_threshold: PRICE_FILTER_THRESHOLD,
            fuzzy_match_marketplaces: FUZZY_MATCH_MARKETPLACES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let price_filter_threshold = std::env::var("PRICE_FILTER_THRESHOLD")
            .unwrap_or_else(|_| PRICE_FILTER_THRESHOLD.to_string())
            .parse::<f64>()
            .map_err(|_| AppError::Config("PRICE_FILTER_THRESHOLD must be a number".to_string()))?;
        if !(0.0..1.0).contains(&price_filter_threshold) {
            return Err(AppError::Config(
                "PRICE_FILTER_THRESHOLD must be in [0, 1)".to_string(),
            ));
        }

        let fuzzy_match_marketplaces = match std::env::var("FUZZY_MATCH_MARKETPLACES") {
            Ok(raw) => split_list(&raw),
            Err(_) => FilterConfig::default().fuzzy_match_marketplaces,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "market_metrics.db".to_string()),
            batch_path: std::env::var("BATCH_PATH").unwrap_or_else(|_| "batch.json".to_string()),
            target_date: match std::env::var("TARGET_DATE") {
                Ok(raw) => Some(parse_date("TARGET_DATE", &raw)?),
                Err(_) => None,
            },
            data_epoch: parse_date(
                "DATA_EPOCH",
                &std::env::var("DATA_EPOCH").unwrap_or_else(|_| DATA_EPOCH.to_string()),
            )?,
            filter: FilterConfig {
                marketplace: std::env::var("MARKETPLACE_FILTER")
                    .ok()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty()),
                price_filter_threshold,
                fuzzy_match_marketplaces,
            },
            aliases_path: std::env::var("ALIASES_PATH").ok().filter(|s| !s.is_empty()),
            archive_path: std::env::var("ARCHIVE_PATH").ok().filter(|s| !s.is_empty()),
            max_concurrency: std::env::var("MAX_CONCURRENCY")
                .unwrap_or_else(|_| MAX_CONCURRENCY.to_string())
                .parse::<usize>()
                .unwrap_or(MAX_CONCURRENCY)
                .max(1),
            cache_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .unwrap_or_else(|_| CACHE_TTL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(CACHE_TTL_SECS),
            serve_api: std::env::var("SERVE_API")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            recompute: recompute_request(
                std::env::var("RECOMPUTE_ENTITY").ok(),
                std::env::var("RECOMPUTE_FROM").ok(),
                std::env::var("RECOMPUTE_TO").ok(),
            )?,
        })
    }
}

fn parse_date(var: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Config(format!("{var} must be a YYYY-MM-DD date, got {raw:?}")))
}

/// An entity id switches the run to recompute mode; both bounds are then required.
fn recompute_request(
    entity_id: Option<String>,
    from: Option<String>,
    to: Option<String>,
) -> Result<Option<RecomputeRequest>> {
    let Some(entity_id) = entity_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let (Some(from), Some(to)) = (from, to) else {
        return Err(AppError::Config(
            "RECOMPUTE_ENTITY requires RECOMPUTE_FROM and RECOMPUTE_TO".to_string(),
        ));
    };
    let from = parse_date("RECOMPUTE_FROM", &from)?;
    let to = parse_date("RECOMPUTE_TO", &to)?;
    if from > to {
        return Err(AppError::Config(format!(
            "RECOMPUTE_FROM {from} is after RECOMPUTE_TO {to}"
        )));
    }
    Ok(Some(RecomputeRequest { entity_id, from, to }))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("TARGET_DATE", "2025-02-30").is_err());
        assert!(parse_date("TARGET_DATE", "yesterday").is_err());
        assert_eq!(
            parse_date("TARGET_DATE", " 2025-03-01 ").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
    }

    #[test]
    fn recompute_needs_entity_and_ordered_bounds() {
        let s = |v: &str| Some(v.to_string());

        assert_eq!(recompute_request(None, s("2025-03-01"), None).unwrap(), None);
        assert_eq!(recompute_request(s(" "), None, None).unwrap(), None);
        assert!(recompute_request(s("op-01"), s("2025-03-01"), None).is_err());
        assert!(recompute_request(s("op-01"), s("2025-03-05"), s("2025-03-01")).is_err());

        let req = recompute_request(s("op-01"), s("2025-03-01"), s("2025-03-05"))
            .unwrap()
            .unwrap();
        assert_eq!(req.entity_id, "op-01");
        assert_eq!(req.from, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(req.to, NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
    }

    #[test]
    fn split_list_trims_and_lowercases() {
        assert_eq!(split_list("eBay, ,Mercari"), vec!["ebay", "mercari"]);
    }
}
