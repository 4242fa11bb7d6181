//! Small numeric helpers shared by the aggregator, the rolling metrics engine
//! and the market index. All of them are pure folds over their input order.

/// Exponential moving average folded left to right:
/// `ema_0 = v_0`, `ema_n = alpha * v_n + (1 - alpha) * ema_(n-1)`.
/// None for an empty series.
pub fn ema<I>(values: I, alpha: f64) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().fold(None, |acc, v| match acc {
        None => Some(v),
        Some(prev) => Some(alpha * v + (1.0 - alpha) * prev),
    })
}

/// Arithmetic mean of the last `n` values (fewer if the series is shorter).
pub fn trailing_mean(values: &[f64], n: usize) -> Option<f64> {
    if values.is_empty() || n == 0 {
        return None;
    }
    let tail = &values[values.len().saturating_sub(n)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Percent change from `past` to `now`; None unless `past` is positive.
pub fn pct_change(now: f64, past: f64) -> Option<f64> {
    if past > 0.0 && now.is_finite() {
        Some((now - past) / past * 100.0)
    } else {
        None
    }
}

/// Linear map of `value` from `[lo, hi]` onto `[0, 100]`, clamped.
pub fn scale_0_100(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if hi <= lo {
        return 50.0;
    }
    ((value - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0)
}

/// Currency and percentage precision for stored values.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Precision for stored rates and averages.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
