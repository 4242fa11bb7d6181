use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::config::maturity::GATE_DAYS;
use crate::config::projection::*;
use crate::config::rolling::*;
use crate::metrics::smoothing::{ema, pct_change, round2, round4, trailing_mean};
use crate::types::{DailySnapshot, Liquidity};

/// Recompute every derived field of the `target_date` snapshot from the
/// entity's ordered history.
///
/// Only snapshots of `entity_id` dated on or before `target_date` are read.
/// Returns None when there is no snapshot for `target_date` itself. The
/// result depends on nothing but the arguments, so re-running with the same
/// history reproduces it exactly.
pub fn compute_rolling_metrics(
    entity_id: &str,
    history: &[DailySnapshot],
    target_date: NaiveDate,
    data_epoch: NaiveDate,
) -> Option<DailySnapshot> {
    // One entry per date, ascending; a later duplicate replaces an earlier one.
    let by_date: BTreeMap<NaiveDate, &DailySnapshot> = history
        .iter()
        .filter(|s| s.entity_id == entity_id && s.date <= target_date)
        .map(|s| (s.date, s))
        .collect();
    let series: Vec<&DailySnapshot> = by_date.into_values().collect();

    let (current, prior) = series.split_last()?;
    if current.date != target_date {
        return None;
    }

    let mut out = DailySnapshot::empty(entity_id, target_date);
    out.floor_price = current.floor_price;
    out.boxes_sold_today = current.boxes_sold_today;
    out.boxes_added_today = current.boxes_added_today;
    out.active_listings_count = current.active_listings_count;
    out.listings_within_10pct = current.listings_within_10pct;
    out.listings_within_20pct = current.listings_within_20pct;
    out.total_listings = current.total_listings;
    out.daily_volume_usd = current.daily_volume_usd;

    // --- floor price changes ---
    let floor_now = current.floor_price;
    out.floor_price_1d_change_pct = prior
        .last()
        .and_then(|prev| change_pct(floor_now, prev.floor_price));
    out.floor_price_7d_change_pct =
        floor_at_or_before(prior, target_date - Duration::days(7)).and_then(|p| change_pct(floor_now, Some(p)));
    out.floor_price_30d_change_pct =
        floor_at_or_before(prior, target_date - Duration::days(30)).and_then(|p| change_pct(floor_now, Some(p)));

    // --- maturity gate ---
    let valid_days = series
        .iter()
        .filter(|s| s.date >= data_epoch && s.has_usable_data())
        .count() as u32;
    let mature = valid_days >= GATE_DAYS;
    out.valid_data_days = valid_days;
    out.days_until_30d_metrics = GATE_DAYS.saturating_sub(valid_days);

    // --- sales and supply rates ---
    let sold: Vec<f64> = series
        .iter()
        .map(|s| s.boxes_sold_today.unwrap_or(0) as f64)
        .collect();
    let added: Vec<f64> = series
        .iter()
        .map(|s| s.boxes_added_today.unwrap_or(0) as f64)
        .collect();

    let sales_30d_avg = trailing_mean(&sold, SMA_ENTRIES).filter(|_| mature);
    let sales_rate = ema(sold.iter().copied(), SALES_EMA_ALPHA);
    let added_short = ema(added.iter().copied(), ADDED_EMA_SHORT_ALPHA);
    let added_long = ema(added.iter().copied(), ADDED_EMA_LONG_ALPHA).filter(|_| mature);

    out.boxes_sold_30d_avg = sales_30d_avg.map(round4);
    out.sales_rate_ema = sales_rate.map(round4);
    out.avg_boxes_added_30d = trailing_mean(&added, SMA_ENTRIES).map(round4);
    out.boxes_added_ema_short = added_short.map(round4);
    out.boxes_added_ema_long = added_long.map(round4);

    // --- projections ---
    out.days_to_20pct_increase = match (sales_30d_avg, added_long, current.active_listings_count) {
        (Some(sales), Some(added), Some(active)) => days_to_20pct_increase(active, sales - added),
        _ => None,
    };

    let supply = current
        .listings_within_10pct
        .or(current.active_listings_count);
    out.expected_days_to_sell = match (supply, sales_rate, added_short) {
        (Some(supply), Some(sales), Some(added)) => expected_days_to_sell(supply, sales - added),
        _ => None,
    };
    out.liquidity = out.expected_days_to_sell.map(Liquidity::from_days_to_sell);

    // --- volume ---
    out.volume_7d = volume_since(&series, target_date, VOLUME_SHORT_DAYS);
    out.volume_30d = volume_since(&series, target_date, VOLUME_LONG_DAYS);
    out.volume_ema = ema(
        series
            .iter()
            .filter_map(|s| s.daily_volume_usd)
            .filter(|v| *v > 0.0),
        VOLUME_EMA_ALPHA,
    )
    .map(round2);

    Some(out)
}

fn change_pct(now: Option<f64>, past: Option<f64>) -> Option<f64> {
    pct_change(now?, past?).map(round2)
}

/// Floor price of the latest snapshot dated on or before `cutoff`.
fn floor_at_or_before(series: &[&DailySnapshot], cutoff: NaiveDate) -> Option<f64> {
    series
        .iter()
        .rev()
        .find(|s| s.date <= cutoff)
        .and_then(|s| s.floor_price)
}

/// Sum of daily volume over the `days`-day calendar window ending at `target`.
fn volume_since(series: &[&DailySnapshot], target: NaiveDate, days: i64) -> Option<f64> {
    let start = target - Duration::days(days - 1);
    let mut total: Option<f64> = None;
    for s in series.iter().filter(|s| s.date >= start && s.date <= target) {
        if let Some(v) = s.daily_volume_usd {
            total = Some(total.unwrap_or(0.0) + v);
        }
    }
    total.map(round2)
}

/// Days until sustained net burn clears the listings within 20% of the floor.
///
/// Stalled but positive burn reports the ceiling; flat or growing supply has
/// no finite answer.
pub fn days_to_20pct_increase(active_listings: u32, net_burn: f64) -> Option<f64> {
    if net_burn > MIN_NET_BURN {
        Some(round2((active_listings as f64 / net_burn).min(MAX_DAYS_TO_20PCT)))
    } else if net_burn <= 0.0 {
        None
    } else {
        Some(MAX_DAYS_TO_20PCT)
    }
}

/// Days to sell through the supply near the floor at the current burn rate.
pub fn expected_days_to_sell(supply: u32, net_burn: f64) -> Option<f64> {
    if net_burn > MIN_NET_BURN {
        Some(round2(
            (supply as f64 / net_burn).clamp(MIN_DAYS_TO_SELL, MAX_DAYS_TO_SELL),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn day(n: i64) -> NaiveDate {
        epoch() + Duration::days(n - 1)
    }

    fn snap(n: i64, floor: f64, sold: u32, added: u32, active: u32) -> DailySnapshot {
        DailySnapshot {
            floor_price: Some(floor),
            boxes_sold_today: Some(sold),
            boxes_added_today: Some(added),
            active_listings_count: Some(active),
            listings_within_20pct: Some(active),
            daily_volume_usd: Some(sold as f64 * floor),
            ..DailySnapshot::empty("E", day(n))
        }
    }

    fn steady_history(days: i64) -> Vec<DailySnapshot> {
        (1..=days).map(|n| snap(n, 100.0, 2, 1, 50)).collect()
    }

    #[test]
    fn end_to_end_steady_entity() {
        let history = steady_history(30);
        let out = compute_rolling_metrics("E", &history, day(30), epoch()).unwrap();

        assert_eq!(out.valid_data_days, 30);
        assert_eq!(out.days_until_30d_metrics, 0);
        assert_eq!(out.boxes_sold_30d_avg, Some(2.0));
        assert_eq!(out.boxes_added_ema_long, Some(1.0));
        // net burn 2 - 1 = 1, 50 listings / 1 per day
        assert_eq!(out.days_to_20pct_increase, Some(50.0));
        assert_eq!(out.floor_price_1d_change_pct, Some(0.0));
        assert_eq!(out.floor_price_30d_change_pct, None);
    }

    #[test]
    fn recomputation_is_identical() {
        let mut history = steady_history(40);
        history[12].floor_price = Some(91.37);
        history[20].boxes_sold_today = Some(0);
        let first = compute_rolling_metrics("E", &history, day(35), epoch());
        let second = compute_rolling_metrics("E", &history, day(35), epoch());
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn later_snapshots_do_not_leak_into_target() {
        let history = steady_history(40);
        let full = compute_rolling_metrics("E", &history, day(30), epoch());
        let prefix = compute_rolling_metrics("E", &history[..30], day(30), epoch());
        assert_eq!(full, prefix);
    }

    #[test]
    fn gate_closed_at_29_days() {
        let history = steady_history(29);
        let out = compute_rolling_metrics("E", &history, day(29), epoch()).unwrap();
        assert_eq!(out.valid_data_days, 29);
        assert_eq!(out.days_until_30d_metrics, 1);
        assert_eq!(out.boxes_sold_30d_avg, None);
        assert_eq!(out.boxes_added_ema_long, None);
        assert_eq!(out.days_to_20pct_increase, None);
        // ungated metrics are still reported
        assert!(out.boxes_added_ema_short.is_some());
        assert!(out.expected_days_to_sell.is_some());
    }

    #[test]
    fn gate_open_at_30_days_averages_zero_days_too() {
        let history: Vec<DailySnapshot> = (1..=30)
            .map(|n| snap(n, 100.0, if n % 2 == 0 { 3 } else { 0 }, 1, 50))
            .collect();
        let out = compute_rolling_metrics("E", &history, day(30), epoch()).unwrap();
        assert_eq!(out.boxes_sold_30d_avg, Some(1.5));
    }

    #[test]
    fn sales_average_uses_last_30_entries_only() {
        let mut history = steady_history(35);
        for s in history.iter_mut().take(5) {
            s.boxes_sold_today = Some(50);
        }
        let out = compute_rolling_metrics("E", &history, day(35), epoch()).unwrap();
        assert_eq!(out.boxes_sold_30d_avg, Some(2.0));
    }

    #[test]
    fn days_before_epoch_do_not_count() {
        let history = steady_history(30);
        let late_epoch = day(3);
        let out = compute_rolling_metrics("E", &history, day(30), late_epoch).unwrap();
        assert_eq!(out.valid_data_days, 28);
        assert_eq!(out.boxes_sold_30d_avg, None);
    }

    #[test]
    fn days_without_floor_are_not_valid_data() {
        let mut history = steady_history(30);
        history[4].floor_price = None;
        let out = compute_rolling_metrics("E", &history, day(30), epoch()).unwrap();
        assert_eq!(out.valid_data_days, 29);
    }

    #[test]
    fn floor_changes_against_nearest_earlier_snapshot() {
        let mut history = vec![snap(1, 80.0, 0, 0, 5), snap(20, 100.0, 0, 0, 5), snap(40, 110.0, 0, 0, 5)];
        history.push(snap(41, 121.0, 0, 0, 5));
        let out = compute_rolling_metrics("E", &history, day(41), epoch()).unwrap();
        assert_eq!(out.floor_price_1d_change_pct, Some(10.0));
        // day 41 - 30 = day 11 → nearest earlier is day 1 at 80
        assert_eq!(out.floor_price_30d_change_pct, Some(51.25));
        // day 41 - 7 = day 34 → day 20 at 100
        assert_eq!(out.floor_price_7d_change_pct, Some(21.0));
    }

    #[test]
    fn missing_previous_floor_gives_null_change() {
        let mut history = steady_history(3);
        history[1].floor_price = None;
        let out = compute_rolling_metrics("E", &history, day(3), epoch()).unwrap();
        assert_eq!(out.floor_price_1d_change_pct, None);
    }

    #[test]
    fn missing_target_snapshot_returns_none() {
        let history = steady_history(5);
        assert!(compute_rolling_metrics("E", &history, day(6), epoch()).is_none());
        assert!(compute_rolling_metrics("OTHER", &history, day(5), epoch()).is_none());
    }

    #[test]
    fn burn_rate_edges() {
        assert_eq!(days_to_20pct_increase(50, 0.0), None);
        assert_eq!(days_to_20pct_increase(50, -1.5), None);
        assert_eq!(days_to_20pct_increase(50, 0.03), Some(180.0));
        assert_eq!(days_to_20pct_increase(2000, 10.0), Some(180.0));
        assert_eq!(days_to_20pct_increase(50, 1.0), Some(50.0));
    }

    #[test]
    fn expected_days_to_sell_is_clamped() {
        assert_eq!(expected_days_to_sell(10, 0.05), None);
        assert_eq!(expected_days_to_sell(0, 2.0), Some(1.0));
        assert_eq!(expected_days_to_sell(10_000, 1.0), Some(365.0));
        assert_eq!(expected_days_to_sell(10, 2.0), Some(5.0));
    }

    #[test]
    fn liquidity_label_boundaries() {
        assert_eq!(Liquidity::from_days_to_sell(4.99), Liquidity::High);
        assert_eq!(Liquidity::from_days_to_sell(5.0), Liquidity::Medium);
        assert_eq!(Liquidity::from_days_to_sell(15.0), Liquidity::Medium);
        assert_eq!(Liquidity::from_days_to_sell(15.01), Liquidity::Low);
    }

    #[test]
    fn liquidity_null_when_projection_null() {
        // supply grows faster than it sells
        let history: Vec<DailySnapshot> = (1..=5).map(|n| snap(n, 100.0, 1, 4, 20)).collect();
        let out = compute_rolling_metrics("E", &history, day(5), epoch()).unwrap();
        assert_eq!(out.expected_days_to_sell, None);
        assert_eq!(out.liquidity, None);
    }

    #[test]
    fn volume_windows_are_calendar_based() {
        // sparse: days 1, 20, 26, 30
        let history = vec![
            snap(1, 100.0, 1, 0, 5),
            snap(20, 100.0, 1, 0, 5),
            snap(26, 100.0, 2, 0, 5),
            snap(30, 100.0, 3, 0, 5),
        ];
        let out = compute_rolling_metrics("E", &history, day(30), epoch()).unwrap();
        // 7-day window is days 24..=30
        assert_eq!(out.volume_7d, Some(500.0));
        // 30-day window is days 1..=30
        assert_eq!(out.volume_30d, Some(700.0));
    }

    #[test]
    fn volume_ema_skips_zero_days() {
        let history = vec![snap(1, 100.0, 1, 0, 5), snap(2, 100.0, 0, 0, 5), snap(3, 100.0, 2, 0, 5)];
        let out = compute_rolling_metrics("E", &history, day(3), epoch()).unwrap();
        // ema over [100, 200] with alpha 0.3
        assert_eq!(out.volume_ema, Some(130.0));
    }
}
