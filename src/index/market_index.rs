use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};

use crate::config::sentiment_thresholds::MOVER_PCT;
use crate::config::INDEX_NAME_DENYLIST;
use crate::index::sentiment::{classify_sentiment, fear_greed, FearGreedInputs};
use crate::metrics::smoothing::{pct_change, round2};
use crate::types::{DailySnapshot, FearGreedLabel, MarketIndexSnapshot, Mover};

/// Horizons (days) for the stored-index change percentages.
const CHANGE_HORIZONS: [u64; 3] = [1, 7, 30];

/// Lookup of previously stored index values by date.
pub trait IndexHistory {
    fn index_value_on(&self, date: NaiveDate) -> Option<f64>;
}

impl IndexHistory for BTreeMap<NaiveDate, f64> {
    fn index_value_on(&self, date: NaiveDate) -> Option<f64> {
        self.get(&date).copied()
    }
}

/// One entity's latest snapshot on or before the index date.
#[derive(Debug, Clone)]
pub struct IndexMember {
    pub entity_id: String,
    pub name: String,
    pub snapshot: DailySnapshot,
}

pub fn is_denylisted(name: &str) -> bool {
    let lower = name.to_lowercase();
    INDEX_NAME_DENYLIST.iter().any(|w| lower.contains(w))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Up,
    Down,
    Flat,
}

fn classify_move(change_1d: Option<f64>) -> Move {
    match change_1d {
        Some(c) if c > MOVER_PCT => Move::Up,
        Some(c) if c < -MOVER_PCT => Move::Down,
        _ => Move::Flat,
    }
}

/// Cross-entity index for `target_date`.
///
/// Members whose snapshot is dated after `target_date`, that have no
/// positive floor price, or whose name hits the denylist are left out.
/// Returns None when nothing is left to index.
pub fn compute_index<H: IndexHistory + ?Sized>(
    target_date: NaiveDate,
    members: &[IndexMember],
    history: &H,
) -> Option<MarketIndexSnapshot> {
    let mut included: Vec<(&IndexMember, f64)> = members
        .iter()
        .filter(|m| m.snapshot.date <= target_date && !is_denylisted(&m.name))
        .filter_map(|m| m.snapshot.floor_price.filter(|p| *p > 0.0).map(|p| (m, p)))
        .collect();
    if included.is_empty() {
        return None;
    }
    included.sort_by(|a, b| a.0.entity_id.cmp(&b.0.entity_id));

    let index_value = round2(included.iter().map(|(_, p)| p).sum());

    let [change_1d_pct, change_7d_pct, change_30d_pct] = CHANGE_HORIZONS.map(|h| {
        target_date
            .checked_sub_days(Days::new(h))
            .and_then(|d| history.index_value_on(d))
            .and_then(|past| pct_change(index_value, past))
            .map(round2)
    });

    let snapshots = || included.iter().map(|(m, _)| &m.snapshot);

    let avg_trend_7d = mean(snapshots().filter_map(|s| s.floor_price_7d_change_pct));
    let sentiment = classify_sentiment(change_7d_pct, avg_trend_7d);

    let total_daily_volume: f64 = snapshots().filter_map(|s| s.daily_volume_usd).sum();
    let fg = fear_greed(&FearGreedInputs {
        mean_floor_change_1d_pct: mean(snapshots().filter_map(|s| s.floor_price_1d_change_pct)),
        total_daily_volume,
        total_volume_ema: snapshots().filter_map(|s| s.volume_ema).sum(),
        mean_boxes_added_today: mean(snapshots().filter_map(|s| s.boxes_added_today.map(f64::from))),
        mean_boxes_sold_today: mean(snapshots().filter_map(|s| s.boxes_sold_today.map(f64::from))),
    });
    let fear_greed_score = round2(fg.score());

    // Movers
    let (mut gainers, mut losers, mut unchanged) = (0u32, 0u32, 0u32);
    let mut top_gainer: Option<Mover> = None;
    let mut top_loser: Option<Mover> = None;
    for (m, _) in &included {
        let change = m.snapshot.floor_price_1d_change_pct;
        match classify_move(change) {
            Move::Up => gainers += 1,
            Move::Down => losers += 1,
            Move::Flat => unchanged += 1,
        }
        let Some(c) = change else { continue };
        let mover = || Mover {
            entity_id: m.entity_id.clone(),
            name: m.name.clone(),
            change_pct: c,
        };
        if c > 0.0 && top_gainer.as_ref().map_or(true, |g| c > g.change_pct) {
            top_gainer = Some(mover());
        }
        if c < 0.0 && top_loser.as_ref().map_or(true, |l| c < l.change_pct) {
            top_loser = Some(mover());
        }
    }

    Some(MarketIndexSnapshot {
        date: target_date,
        index_value,
        change_1d_pct,
        change_7d_pct,
        change_30d_pct,
        sentiment,
        fear_greed_score,
        fear_greed_label: FearGreedLabel::from_score(fear_greed_score),
        fear_greed: fg,
        entities_included: included.len() as u32,
        gainers,
        losers,
        unchanged,
        top_gainer,
        top_loser,
        total_daily_volume: round2(total_daily_volume),
        total_volume_30d: round2(snapshots().filter_map(|s| s.volume_30d).sum()),
        total_active_listings: snapshots().filter_map(|s| s.active_listings_count).sum(),
        total_boxes_added: snapshots().filter_map(|s| s.boxes_added_today).sum(),
    })
}
