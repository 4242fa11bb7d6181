use serde::Serialize;

use crate::config::{FilterConfig, EXCLUDED_REGION_KEYWORDS, PRODUCT_TYPE_QUALIFIERS};
use crate::ingest::lot_size::unit_price;
use crate::types::{Entity, RawObservation};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FilterStats {
    pub input: usize,
    pub accepted: usize,
    pub rejected_malformed: usize,
    pub rejected_marketplace: usize,
    pub rejected_region: usize,
    pub rejected_title: usize,
    pub rejected_price: usize,
    /// Titles accepted through the display-name token fallback.
    pub title_fallback_matches: usize,
}

impl FilterStats {
    pub fn merge(&mut self, other: &FilterStats) {
        self.input += other.input;
        self.accepted += other.accepted;
        self.rejected_malformed += other.rejected_malformed;
        self.rejected_marketplace += other.rejected_marketplace;
        self.rejected_region += other.rejected_region;
        self.rejected_title += other.rejected_title;
        self.rejected_price += other.rejected_price;
        self.title_fallback_matches += other.title_fallback_matches;
    }
}

enum Rejection {
    Malformed,
    Marketplace,
    Region,
    Title,
    Price,
}

/// How a listing title was matched to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleMatch {
    /// Identifier pattern plus a product-type qualifier.
    Identifier,
    /// No identifier pattern; a majority of display-name tokens appeared.
    NameTokens,
    NoMatch,
}

/// Drop low-quality observations before reconciliation. Pure: the inputs
/// fully determine the output.
pub fn filter_observations(
    observations: Vec<RawObservation>,
    entity: &Entity,
    current_floor_price: Option<f64>,
    cfg: &FilterConfig,
) -> (Vec<RawObservation>, FilterStats) {
    let mut stats = FilterStats {
        input: observations.len(),
        ..Default::default()
    };
    let mut kept = Vec::with_capacity(observations.len());

    for obs in observations {
        match check_observation(&obs, entity, current_floor_price, cfg) {
            Ok(matched) => {
                if matched == Some(TitleMatch::NameTokens) {
                    stats.title_fallback_matches += 1;
                }
                kept.push(obs);
            }
            Err(rejection) => match rejection {
                Rejection::Malformed => stats.rejected_malformed += 1,
                Rejection::Marketplace => stats.rejected_marketplace += 1,
                Rejection::Region => stats.rejected_region += 1,
                Rejection::Title => stats.rejected_title += 1,
                Rejection::Price => stats.rejected_price += 1,
            },
        }
    }

    stats.accepted = kept.len();
    (kept, stats)
}

fn check_observation(
    obs: &RawObservation,
    entity: &Entity,
    current_floor_price: Option<f64>,
    cfg: &FilterConfig,
) -> std::result::Result<Option<TitleMatch>, Rejection> {
    let price_ok = obs.price.is_some_and(|p| p.is_finite() && p > 0.0);
    let quantity_ok = obs.quantity.is_some_and(|q| q > 0);
    if !price_ok || !quantity_ok {
        return Err(Rejection::Malformed);
    }

    let marketplace = obs.marketplace_key();
    if let Some(only) = &cfg.marketplace {
        if &marketplace != only {
            return Err(Rejection::Marketplace);
        }
    }

    if has_excluded_region(&obs.title, obs.description.as_deref()) {
        return Err(Rejection::Region);
    }

    let mut matched = None;
    if cfg.fuzzy_match_marketplaces.iter().any(|m| m == &marketplace) {
        match match_title(&obs.title, entity) {
            TitleMatch::NoMatch => return Err(Rejection::Title),
            m => matched = Some(m),
        }
    }

    if let (Some(floor), Some(unit)) = (current_floor_price, unit_price(obs)) {
        if floor > 0.0 && unit < floor * (1.0 - cfg.price_filter_threshold) {
            return Err(Rejection::Price);
        }
    }

    Ok(matched)
}

fn has_excluded_region(title: &str, description: Option<&str>) -> bool {
    let mut combined = title.to_lowercase();
    if let Some(d) = description {
        combined.push(' ');
        combined.push_str(&d.to_lowercase());
    }
    EXCLUDED_REGION_KEYWORDS.iter().any(|kw| combined.contains(kw))
}

/// Lowercase alphanumerics only, so "OP-01", "op01" and "OP 01" compare equal.
fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

pub fn match_title(title: &str, entity: &Entity) -> TitleMatch {
    let lower = title.to_lowercase();

    let pattern = entity
        .identifier_pattern
        .as_deref()
        .map(compact)
        .filter(|p| !p.is_empty());

    if let Some(pattern) = pattern {
        let has_qualifier = PRODUCT_TYPE_QUALIFIERS.iter().any(|q| lower.contains(q));
        return if has_qualifier && compact(title).contains(&pattern) {
            TitleMatch::Identifier
        } else {
            TitleMatch::NoMatch
        };
    }

    let tokens: Vec<String> = entity
        .name
        .split_whitespace()
        .map(compact)
        .filter(|t| t.chars().count() > 2)
        .collect();
    if tokens.is_empty() {
        return TitleMatch::NoMatch;
    }

    let hits = tokens.iter().filter(|t| lower.contains(t.as_str())).count();
    if hits * 2 > tokens.len() {
        TitleMatch::NameTokens
    } else {
        TitleMatch::NoMatch
    }
}
