use std::sync::OnceLock;

use regex::Regex;

use crate::config::MAX_LOT_SIZE;
use crate::types::RawObservation;

fn lot_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\blot\s+of\s+(\d{1,2})\b",
            r"(?i)\bqty\.?\s*:?\s*(\d{1,2})\b",
            r"(?i)\b(\d{1,2})\s*x\b",
            r"(?i)\bx\s*(\d{1,2})\b",
            r"(?i)\b(\d{1,2})\s+(?:sealed\s+)?(?:booster\s+)?boxes\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid lot-size pattern"))
        .collect()
    })
}

/// Bundle size parsed from a listing title ("x2", "2x", "lot of 3", "qty 2").
/// Returns 1 when nothing plausible is found.
pub fn detect_lot_size(title: &str) -> u32 {
    for pattern in lot_patterns() {
        for caps in pattern.captures_iter(title) {
            let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                continue;
            };
            if (2..=MAX_LOT_SIZE).contains(&n) {
                return n;
            }
        }
    }
    1
}

/// Boxes covered by one unit of this observation. A collector-supplied
/// `lot_size` wins over title parsing.
pub fn lot_size_of(obs: &RawObservation) -> u32 {
    match obs.lot_size {
        Some(n) if n >= 1 => n,
        _ => detect_lot_size(&obs.title),
    }
}

/// Total price (item + shipping) divided by the lot size.
pub fn unit_price(obs: &RawObservation) -> Option<f64> {
    obs.total_price().map(|total| total / lot_size_of(obs) as f64)
}
