use flowcore::Side;
use serde::Serialize;

/// Lower bound for the running deviation; z-scores divide by it.
pub const MIN_DEVIATION: f64 = 1e-3;

/// Adaptive "normal" level of one rate metric.
///
/// An EMA of the value plus an EMA of the absolute deviation from it, both
/// smoothed with `alpha = 1 - exp(-dt / tau)` so that irregular update
/// spacing is accounted for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Baseline {
    pub ema: f64,
    pub mean_abs_deviation: f64,
    pub initialized: bool,
    pub last_update_ts: u64,
}

impl Baseline {
    pub fn update(&mut self, value: f64, ts_ms: u64, tau_ms: f64) {
        if !value.is_finite() {
            return;
        }

        if !self.initialized {
            self.ema = value;
            self.mean_abs_deviation = (value * 0.25 + 1.0).max(MIN_DEVIATION);
            self.initialized = true;
            self.last_update_ts = ts_ms;
            return;
        }

        let dt = ts_ms.saturating_sub(self.last_update_ts) as f64;
        let alpha = 1.0 - (-dt / tau_ms.max(1.0)).exp();

        let deviation = (value - self.ema).abs();
        self.ema += alpha * (value - self.ema);
        self.mean_abs_deviation = (self.mean_abs_deviation
            + alpha * (deviation - self.mean_abs_deviation))
            .max(MIN_DEVIATION);
        self.last_update_ts = self.last_update_ts.max(ts_ms);
    }

    /// How far `value` sits above the adaptive threshold, in deviations.
    ///
    /// The threshold is `ema + k * deviation`, but never below `min_abs_floor`.
    /// An uninitialized baseline scores 0.
    pub fn z_score(&self, value: f64, sensitivity_k: f64, min_abs_floor: f64) -> f64 {
        if !self.initialized || !value.is_finite() {
            return 0.0;
        }
        let threshold = (self.ema + sensitivity_k * self.mean_abs_deviation).max(min_abs_floor);
        (value - threshold) / self.mean_abs_deviation
    }
}

/// Pace (trades/sec) and loudness (volume/sec) baselines of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SideBaselines {
    pub pace: Baseline,
    pub loudness: Baseline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BaselineState {
    pub buy: SideBaselines,
    pub sell: SideBaselines,
}

impl BaselineState {
    pub fn side(&self, side: Side) -> &SideBaselines {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideBaselines {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}
