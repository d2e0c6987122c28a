//! Window aggregation.
//!
//! Statistics are recomputed from the full window contents on every tick.
//! The window is capped, so the O(n) pass stays bounded and there is no
//! running sum to drift out of sync with the stored ticks.

use flowcore::{Side, Tick};
use serde::Serialize;

use crate::config::{DominanceMetric, window_secs};

/// Per-window statistics. Rates are normalized by the configured window
/// length, not by the span actually covered by the stored ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub window_ms: u64,

    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_count: usize,
    pub sell_count: usize,

    pub total_volume: f64,
    pub total_count: usize,

    pub trades_per_sec: f64,
    pub volume_per_sec: f64,

    pub buy_trades_per_sec: f64,
    pub sell_trades_per_sec: f64,
    pub buy_volume_per_sec: f64,
    pub sell_volume_per_sec: f64,

    /// Buy share of the selected metric, `0` on an empty window.
    pub buy_ratio: f64,
    /// Sell share of the selected metric, `0` on an empty window.
    pub sell_ratio: f64,

    /// `(buy - sell) / (buy + sell)` over the selected metric, in `[-1, 1]`.
    pub imbalance: f64,
}

impl WindowStats {
    pub fn ratio(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_ratio,
            Side::Sell => self.sell_ratio,
        }
    }

    pub fn trades_per_sec_of(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_trades_per_sec,
            Side::Sell => self.sell_trades_per_sec,
        }
    }

    pub fn volume_per_sec_of(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_volume_per_sec,
            Side::Sell => self.sell_volume_per_sec,
        }
    }
}

/// Aggregate the given window contents.
pub fn aggregate<'a, I>(ticks: I, window_ms: u64, metric: DominanceMetric) -> WindowStats
where
    I: IntoIterator<Item = &'a Tick>,
{
    let mut s = WindowStats {
        window_ms,
        ..Default::default()
    };

    for t in ticks {
        match t.side {
            Side::Buy => {
                s.buy_volume += t.volume;
                s.buy_count += 1;
            }
            Side::Sell => {
                s.sell_volume += t.volume;
                s.sell_count += 1;
            }
        }
    }

    s.total_volume = s.buy_volume + s.sell_volume;
    s.total_count = s.buy_count + s.sell_count;

    let secs = window_secs(window_ms);
    s.trades_per_sec = s.total_count as f64 / secs;
    s.volume_per_sec = s.total_volume / secs;
    s.buy_trades_per_sec = s.buy_count as f64 / secs;
    s.sell_trades_per_sec = s.sell_count as f64 / secs;
    s.buy_volume_per_sec = s.buy_volume / secs;
    s.sell_volume_per_sec = s.sell_volume / secs;

    let (buy, sell) = match metric {
        DominanceMetric::Volume => (s.buy_volume, s.sell_volume),
        DominanceMetric::Count => (s.buy_count as f64, s.sell_count as f64),
    };
    let denominator = buy + sell;

    if denominator > 0.0 {
        s.buy_ratio = buy / denominator;
        s.sell_ratio = sell / denominator;
        s.imbalance = ((buy - sell) / denominator).clamp(-1.0, 1.0);
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(side: Side, volume: f64) -> Tick {
        Tick::new(0, side, volume)
    }

    #[test]
    fn empty_window_is_neutral_not_nan() {
        let s = aggregate(std::iter::empty(), 1_000, DominanceMetric::Volume);

        assert_eq!(s.buy_ratio, 0.0);
        assert_eq!(s.sell_ratio, 0.0);
        assert_eq!(s.imbalance, 0.0);
        assert_eq!(s.trades_per_sec, 0.0);
        assert!(!s.buy_ratio.is_nan());
    }

    #[test]
    fn zero_volume_trades_are_neutral_under_volume_metric() {
        let ticks = vec![t(Side::Buy, 0.0), t(Side::Sell, 0.0)];
        let s = aggregate(&ticks, 1_000, DominanceMetric::Volume);

        assert_eq!(s.total_count, 2);
        assert_eq!(s.buy_ratio, 0.0);
        assert_eq!(s.imbalance, 0.0);
    }

    #[test]
    fn volume_and_count_metrics_differ() {
        let ticks = vec![t(Side::Buy, 9.0), t(Side::Sell, 1.0), t(Side::Sell, 2.0)];

        let by_vol = aggregate(&ticks, 1_000, DominanceMetric::Volume);
        assert!((by_vol.buy_ratio - 0.75).abs() < 1e-12);
        assert!((by_vol.imbalance - 0.5).abs() < 1e-12);

        let by_count = aggregate(&ticks, 1_000, DominanceMetric::Count);
        assert!((by_count.buy_ratio - 1.0 / 3.0).abs() < 1e-12);
        assert!((by_count.sell_ratio - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn rates_are_normalized_by_window_length() {
        let ticks = vec![t(Side::Buy, 4.0), t(Side::Sell, 2.0), t(Side::Buy, 4.0)];
        let s = aggregate(&ticks, 500, DominanceMetric::Volume);

        assert_eq!(s.trades_per_sec, 6.0);
        assert_eq!(s.volume_per_sec, 20.0);
        assert_eq!(s.buy_trades_per_sec, 4.0);
        assert_eq!(s.sell_volume_per_sec, 4.0);
    }

    #[test]
    fn zero_window_length_does_not_divide_by_zero() {
        let ticks = vec![t(Side::Buy, 1.0)];
        let s = aggregate(&ticks, 0, DominanceMetric::Volume);
        assert!(s.trades_per_sec.is_finite());
    }
}
