use crate::config::sentiment_thresholds::*;
use crate::metrics::smoothing::{pct_change, scale_0_100};
use crate::types::{FearGreedBreakdown, Sentiment};

/// Directional label for the index. Both the index move and the average
/// per-entity trend must point the same way; otherwise NEUTRAL.
pub fn classify_sentiment(index_change_7d: Option<f64>, avg_entity_trend_7d: Option<f64>) -> Sentiment {
    match (index_change_7d, avg_entity_trend_7d) {
        (Some(change), Some(trend)) if change > INDEX_7D_PCT && trend > 0.0 => Sentiment::Bullish,
        (Some(change), Some(trend)) if change < -INDEX_7D_PCT && trend < 0.0 => Sentiment::Bearish,
        _ => Sentiment::Neutral,
    }
}

/// Inputs to the fear/greed score, already averaged or summed across entities.
/// A None input contributes a neutral 50.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FearGreedInputs {
    pub mean_floor_change_1d_pct: Option<f64>,
    pub total_daily_volume: f64,
    pub total_volume_ema: f64,
    pub mean_boxes_added_today: Option<f64>,
    pub mean_boxes_sold_today: Option<f64>,
}

pub fn fear_greed(inputs: &FearGreedInputs) -> FearGreedBreakdown {
    const NEUTRAL: f64 = 50.0;

    let price_momentum = inputs
        .mean_floor_change_1d_pct
        .map_or(NEUTRAL, |c| scale_0_100(c, PRICE_MOMENTUM_RANGE));

    let volume_momentum = pct_change(inputs.total_daily_volume, inputs.total_volume_ema)
        .map_or(NEUTRAL, |c| scale_0_100(c, VOLUME_MOMENTUM_RANGE));

    // More new supply reads as fear, so the axis is flipped.
    let listing_trend = inputs
        .mean_boxes_added_today
        .map_or(NEUTRAL, |a| scale_0_100(-a, LISTING_TREND_RANGE));

    let sales_velocity = inputs
        .mean_boxes_sold_today
        .map_or(NEUTRAL, |s| scale_0_100(s, SALES_VELOCITY_RANGE));

    FearGreedBreakdown {
        price_momentum,
        volume_momentum,
        listing_trend,
        sales_velocity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FearGreedLabel;

    #[test]
    fn bullish_needs_index_and_trend_up() {
        assert_eq!(classify_sentiment(Some(3.0), Some(1.2)), Sentiment::Bullish);
        assert_eq!(classify_sentiment(Some(3.0), Some(-0.4)), Sentiment::Neutral);
        assert_eq!(classify_sentiment(Some(2.0), Some(1.0)), Sentiment::Neutral);
    }

    #[test]
    fn bearish_needs_index_and_trend_down() {
        assert_eq!(classify_sentiment(Some(-3.0), Some(-1.0)), Sentiment::Bearish);
        assert_eq!(classify_sentiment(Some(-3.0), Some(0.5)), Sentiment::Neutral);
    }

    #[test]
    fn missing_inputs_are_neutral() {
        assert_eq!(classify_sentiment(None, Some(5.0)), Sentiment::Neutral);
        assert_eq!(classify_sentiment(Some(5.0), None), Sentiment::Neutral);
    }

    #[test]
    fn flat_prices_give_neutral_price_momentum() {
        let fg = fear_greed(&FearGreedInputs {
            mean_floor_change_1d_pct: Some(0.0),
            ..Default::default()
        });
        assert!((fg.price_momentum - 50.0).abs() < 1e-9);
    }

    #[test]
    fn sub_scores_are_clamped() {
        let fg = fear_greed(&FearGreedInputs {
            mean_floor_change_1d_pct: Some(12.0),
            total_daily_volume: 500.0,
            total_volume_ema: 100.0,
            mean_boxes_added_today: Some(9.0),
            mean_boxes_sold_today: Some(10.0),
        });
        assert_eq!(fg.price_momentum, 100.0);
        assert_eq!(fg.volume_momentum, 100.0);
        assert_eq!(fg.listing_trend, 0.0);
        assert_eq!(fg.sales_velocity, 100.0);
        assert_eq!(fg.score(), 75.0);
        assert_eq!(FearGreedLabel::from_score(fg.score()), FearGreedLabel::Greed);
    }

    #[test]
    fn volume_momentum_against_ema() {
        let fg = fear_greed(&FearGreedInputs {
            total_daily_volume: 75.0,
            total_volume_ema: 100.0,
            ..Default::default()
        });
        // -25% maps to 25
        assert!((fg.volume_momentum - 25.0).abs() < 1e-9);
    }

    #[test]
    fn zero_ema_volume_is_neutral() {
        let fg = fear_greed(&FearGreedInputs::default());
        assert_eq!(fg.volume_momentum, 50.0);
        assert_eq!(fg.score(), 50.0);
    }
}
