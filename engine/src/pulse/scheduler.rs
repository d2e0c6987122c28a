//! Adaptive Baseline Pulse Scheduler
//!
//! Continuous output rather than discrete events: at any time there is at
//! most one *active side*, and while one is active the scheduler hands out a
//! pulse every `1000 / rate` milliseconds.
//!
//! ## Scoring
//! Each side keeps EMA baselines of its pace (trades/sec) and loudness
//! (volume/sec). A new rate is scored against the baseline as it stood
//! *before* the rate is folded in:
//!
//! ```text
//! z = (value - max(min_abs_floor, ema + k * deviation)) / deviation
//! ```
//!
//! ## Side selection
//! The side with the higher positive pace score wins, ties go to the active
//! side. Leaving the active side also needs `min_switch_ms` since the last
//! switch and a lead of `switch_margin_z`. No positive score means silence.
//!
//! ## Shaping
//! ```text
//! intensity = clamp(z_pace / full_scale_z, 0, 1)
//! rate      = min_rate + intensity^rate_curve * (max_rate - min_rate)
//! loudness  = clamp(z_loud / full_scale_z, 0, 1)
//! volume    = min_volume + loudness^rate_curve * (max_volume - min_volume)
//! ```
//!
//! `advance(now)` is pure with respect to wall-clock time: it never sleeps and
//! returns at most one fire instruction per call.

use flowcore::{RawTick, Side, Tick};
use serde::Serialize;
use tracing::{debug, info, trace};

use super::baseline::BaselineState;
use crate::config::{PulseConfig, PulsePatch};
use crate::normalized_tick::normalize;
use crate::rolling_window::RollingWindow;
use crate::stats::{WindowStats, aggregate};

/// Instantaneous rates of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SideRates {
    pub trades_per_sec: f64,
    pub volume_per_sec: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerSideRates {
    pub buy: SideRates,
    pub sell: SideRates,
}

impl PerSideRates {
    pub fn from_stats(stats: &WindowStats) -> Self {
        Self {
            buy: SideRates {
                trades_per_sec: stats.buy_trades_per_sec,
                volume_per_sec: stats.buy_volume_per_sec,
            },
            sell: SideRates {
                trades_per_sec: stats.sell_trades_per_sec,
                volume_per_sec: stats.sell_volume_per_sec,
            },
        }
    }

    pub fn side(&self, side: Side) -> SideRates {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }
}

/// Latest z-scores of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SideScores {
    pub pace_z: f64,
    pub loudness_z: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Scores {
    pub buy: SideScores,
    pub sell: SideScores,
}

impl Scores {
    pub fn side(&self, side: Side) -> SideScores {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }
}

/// Active-side change, reported once per change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideSwitch {
    pub ts_ms: u64,
    pub from: Option<Side>,
    pub to: Option<Side>,
    pub from_score: Option<f64>,
    pub to_score: Option<f64>,
}

/// One pulse for the audio collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PulseFire {
    pub ts_ms: u64,
    pub side: Side,
    /// Pulses per second this fire was scheduled at.
    pub rate: f64,
    pub intensity: f64,
    /// Pseudo-volume within `[min_volume, max_volume]`.
    pub volume: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PulseSnapshot {
    pub config: PulseConfig,
    pub baselines: BaselineState,
    pub scores: Scores,
    pub last_rates: PerSideRates,
    pub active_side: Option<Side>,
    pub active_score: f64,
    pub last_switch_at: Option<u64>,
    pub next_fire_at: Option<u64>,
    pub window_len: usize,
}

pub struct PulseScheduler {
    config: PulseConfig,
    window: RollingWindow<Tick>,
    baselines: BaselineState,
    scores: Scores,
    last_rates: PerSideRates,
    active_side: Option<Side>,
    active_score: f64,
    last_switch_at: Option<u64>,
    /// In the clock passed to `advance`. `None` fires on the next call.
    next_fire_at: Option<u64>,
}

impl PulseScheduler {
    pub fn new(config: PulseConfig) -> Self {
        Self {
            window: RollingWindow::new(config.rate_window_ms, config.max_window_trades),
            config,
            baselines: BaselineState::default(),
            scores: Scores::default(),
            last_rates: PerSideRates::default(),
            active_side: None,
            active_score: 0.0,
            last_switch_at: None,
            next_fire_at: None,
        }
    }

    /// Normalize a raw record, fold it into the rate window and update the
    /// baselines from the resulting per-side rates.
    pub fn ingest(&mut self, raw: &RawTick) -> Option<SideSwitch> {
        match normalize(raw) {
            Ok(tick) => self.process(tick),
            Err(e) => {
                debug!(error = %e, "dropping malformed tick");
                None
            }
        }
    }

    pub fn process(&mut self, tick: Tick) -> Option<SideSwitch> {
        let now = tick.ts_ms;
        self.window.push(now, tick);

        let stats = aggregate(
            self.window.iter(),
            self.config.rate_window_ms,
            Default::default(),
        );
        self.update_from_rates(PerSideRates::from_stats(&stats), now)
    }

    /// Score the new rates, fold them into the baselines and re-run side
    /// selection. Returns the change of active side, if any.
    pub fn update_from_rates(&mut self, rates: PerSideRates, ts_ms: u64) -> Option<SideSwitch> {
        let tau = self.config.tau_ms();
        let k = self.config.sensitivity_k;

        for side in Side::BOTH {
            let r = rates.side(side);
            let b = self.baselines.side_mut(side);

            let scores = SideScores {
                pace_z: b.pace.z_score(r.trades_per_sec, k, self.config.min_abs_pace),
                loudness_z: b
                    .loudness
                    .z_score(r.volume_per_sec, k, self.config.min_abs_loudness),
            };

            b.pace.update(r.trades_per_sec, ts_ms, tau);
            b.loudness.update(r.volume_per_sec, ts_ms, tau);

            match side {
                Side::Buy => self.scores.buy = scores,
                Side::Sell => self.scores.sell = scores,
            }
        }
        self.last_rates = rates;

        self.select_side(ts_ms)
    }

    /// Best side with a positive pace score; ties favor the active side.
    fn candidate(&self) -> Option<Side> {
        let buy = self.scores.buy.pace_z;
        let sell = self.scores.sell.pace_z;

        match (buy > 0.0, sell > 0.0) {
            (false, false) => None,
            (true, false) => Some(Side::Buy),
            (false, true) => Some(Side::Sell),
            (true, true) if buy > sell => Some(Side::Buy),
            (true, true) if sell > buy => Some(Side::Sell),
            (true, true) => Some(self.active_side.unwrap_or(Side::Buy)),
        }
    }

    fn select_side(&mut self, now: u64) -> Option<SideSwitch> {
        let candidate = self.candidate();
        let current = self.active_side;

        let next = match (current, candidate) {
            (_, None) => None,
            (None, Some(c)) => Some(c),
            (Some(a), Some(c)) if a == c => Some(a),
            (Some(a), Some(c)) => {
                let waited = self
                    .last_switch_at
                    .is_none_or(|t| now.saturating_sub(t) >= self.config.min_switch_ms);
                let leads = self.scores.side(c).pace_z
                    >= self.scores.side(a).pace_z + self.config.switch_margin_z;
                if waited && leads { Some(c) } else { Some(a) }
            }
        };

        self.active_score = next.map_or(0.0, |s| self.scores.side(s).pace_z);

        if next == current {
            return None;
        }

        self.active_side = next;
        self.next_fire_at = None;
        if next.is_some() {
            self.last_switch_at = Some(now);
        }

        let switch = SideSwitch {
            ts_ms: now,
            from: current,
            to: next,
            from_score: current.map(|s| self.scores.side(s).pace_z),
            to_score: next.map(|s| self.scores.side(s).pace_z),
        };

        info!(from = ?switch.from, to = ?switch.to, score = ?switch.to_score, "pulse side switch");

        Some(switch)
    }

    /// Called by a periodic driver. Returns a fire instruction when a side
    /// is active and `now_ms` has reached the scheduled fire time.
    pub fn advance(&mut self, now_ms: u64) -> Option<PulseFire> {
        let side = self.active_side?;

        if let Some(next) = self.next_fire_at
            && now_ms < next
        {
            return None;
        }

        let scores = self.scores.side(side);
        let full_scale = if self.config.full_scale_z > 0.0 {
            self.config.full_scale_z
        } else {
            1.0
        };
        let curve = if self.config.rate_curve.is_finite() && self.config.rate_curve > 0.0 {
            self.config.rate_curve
        } else {
            1.0
        };

        let intensity = normalize_z(scores.pace_z, full_scale);
        let (min_rate, max_rate) = self.config.rate_range();
        let rate = min_rate + intensity.powf(curve) * (max_rate - min_rate);

        let loudness = normalize_z(scores.loudness_z, full_scale);
        let volume = self.config.min_volume
            + loudness.powf(curve) * (self.config.max_volume - self.config.min_volume);

        let interval_ms = 1000.0 / rate;
        self.next_fire_at = Some(now_ms.saturating_add(interval_ms.round().max(1.0) as u64));

        let duration_ms = (self.config.pulse_duration_ms as f64).min(interval_ms * 0.8);

        trace!(side = %side, rate, volume, "pulse");

        Some(PulseFire {
            ts_ms: now_ms,
            side,
            rate,
            intensity,
            volume,
            duration_secs: duration_ms / 1000.0,
        })
    }

    pub fn update_config(&mut self, patch: &PulsePatch) {
        self.config = self.config.merged(patch);
        self.window
            .set_limits(self.config.rate_window_ms, self.config.max_window_trades);
    }

    /// Clear window, baselines and scheduling state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.baselines = BaselineState::default();
        self.scores = Scores::default();
        self.last_rates = PerSideRates::default();
        self.active_side = None;
        self.active_score = 0.0;
        self.last_switch_at = None;
        self.next_fire_at = None;
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    pub fn active_side(&self) -> Option<Side> {
        self.active_side
    }

    pub fn scores(&self) -> Scores {
        self.scores
    }

    pub fn state(&self) -> PulseSnapshot {
        PulseSnapshot {
            config: self.config.clone(),
            baselines: self.baselines,
            scores: self.scores,
            last_rates: self.last_rates,
            active_side: self.active_side,
            active_score: self.active_score,
            last_switch_at: self.last_switch_at,
            next_fire_at: self.next_fire_at,
            window_len: self.window.len(),
        }
    }
}

impl Default for PulseScheduler {
    fn default() -> Self {
        Self::new(PulseConfig::default())
    }
}

fn normalize_z(z: f64, full_scale: f64) -> f64 {
    if z.is_finite() {
        (z / full_scale).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PulseConfig {
        PulseConfig {
            min_switch_ms: 1_000,
            switch_margin_z: 0.5,
            ..Default::default()
        }
    }

    fn with_scores(s: &mut PulseScheduler, buy: f64, sell: f64) {
        s.scores.buy.pace_z = buy;
        s.scores.sell.pace_z = sell;
    }

    #[test]
    fn no_positive_score_means_silence() {
        let mut s = PulseScheduler::new(cfg());
        with_scores(&mut s, -0.2, 0.0);
        assert!(s.select_side(0).is_none());
        assert_eq!(s.active_side(), None);
        assert!(s.advance(0).is_none());
    }

    #[test]
    fn picks_higher_positive_score() {
        let mut s = PulseScheduler::new(cfg());
        with_scores(&mut s, 0.4, 1.2);
        let sw = s.select_side(0).expect("activated");
        assert_eq!(sw.from, None);
        assert_eq!(sw.to, Some(Side::Sell));
    }

    #[test]
    fn tie_favors_active_side() {
        let mut s = PulseScheduler::new(cfg());
        with_scores(&mut s, 0.0, 1.0);
        s.select_side(0);
        assert_eq!(s.active_side(), Some(Side::Sell));

        with_scores(&mut s, 1.0, 1.0);
        assert!(s.select_side(5_000).is_none());
        assert_eq!(s.active_side(), Some(Side::Sell));
    }

    #[test]
    fn switch_needs_margin_and_min_interval() {
        let mut s = PulseScheduler::new(cfg());
        with_scores(&mut s, 1.0, 0.0);
        s.select_side(0);

        // leads by margin, but too soon
        with_scores(&mut s, 1.0, 2.0);
        assert!(s.select_side(500).is_none());
        assert_eq!(s.active_side(), Some(Side::Buy));

        // waited, but lead below margin
        with_scores(&mut s, 1.0, 1.4);
        assert!(s.select_side(2_000).is_none());
        assert_eq!(s.active_side(), Some(Side::Buy));

        // both satisfied
        with_scores(&mut s, 1.0, 1.5);
        let sw = s.select_side(2_100).expect("switched");
        assert_eq!(sw.from, Some(Side::Buy));
        assert_eq!(sw.to, Some(Side::Sell));
        assert_eq!(s.state().last_switch_at, Some(2_100));
    }

    #[test]
    fn silence_when_all_scores_drop() {
        let mut s = PulseScheduler::new(cfg());
        with_scores(&mut s, 1.0, 0.0);
        s.select_side(0);

        with_scores(&mut s, -0.1, -0.3);
        let sw = s.select_side(10).expect("released");
        assert_eq!(sw.to, None);
        assert!(s.advance(10).is_none());
    }

    #[test]
    fn advance_paces_fires_by_rate() {
        let mut s = PulseScheduler::new(PulseConfig {
            min_rate: 2.0,
            max_rate: 20.0,
            full_scale_z: 3.0,
            rate_curve: 1.0,
            ..cfg()
        });
        with_scores(&mut s, 1.5, 0.0);
        s.select_side(0);

        // intensity 0.5 -> 11 pulses/sec -> ~91ms apart
        let first = s.advance(1_000).expect("fires immediately after activation");
        assert_eq!(first.side, Side::Buy);
        assert!((first.intensity - 0.5).abs() < 1e-12);
        assert!((first.rate - 11.0).abs() < 1e-12);

        assert!(s.advance(1_050).is_none());
        assert!(s.advance(1_090).is_none());
        assert!(s.advance(1_091).is_some());
    }

    #[test]
    fn rate_curve_bends_the_ramp() {
        let mut s = PulseScheduler::new(PulseConfig {
            min_rate: 0.0,
            max_rate: 10.0,
            full_scale_z: 1.0,
            rate_curve: 2.0,
            ..cfg()
        });
        with_scores(&mut s, 0.5, 0.0);
        s.select_side(0);

        // min_rate is floored at 0.1: 0.1 + 0.25 * 9.9
        let fire = s.advance(0).unwrap();
        assert!((fire.rate - (0.1 + 0.25 * 9.9)).abs() < 1e-9);
    }

    #[test]
    fn loudness_maps_into_volume_range() {
        let mut s = PulseScheduler::new(PulseConfig {
            min_volume: 0.2,
            max_volume: 1.0,
            full_scale_z: 2.0,
            ..cfg()
        });
        with_scores(&mut s, 1.0, 0.0);
        s.scores.buy.loudness_z = 1.0;
        s.select_side(0);

        let fire = s.advance(0).unwrap();
        assert!((fire.volume - 0.6).abs() < 1e-12);
        assert!(fire.duration_secs > 0.0);
    }

    #[test]
    fn rate_curve_bends_loudness_too() {
        let mut s = PulseScheduler::new(PulseConfig {
            min_volume: 0.2,
            max_volume: 1.0,
            full_scale_z: 2.0,
            rate_curve: 2.0,
            ..cfg()
        });
        with_scores(&mut s, 1.0, 0.0);
        s.scores.buy.loudness_z = 1.0;
        s.select_side(0);

        // 0.2 + 0.5^2 * 0.8
        let fire = s.advance(0).unwrap();
        assert!((fire.volume - 0.4).abs() < 1e-12);
        assert!((fire.intensity - 0.5).abs() < 1e-12);
    }

    #[test]
    fn duration_never_exceeds_interval() {
        let mut s = PulseScheduler::new(PulseConfig {
            min_rate: 50.0,
            max_rate: 50.0,
            pulse_duration_ms: 500,
            ..cfg()
        });
        with_scores(&mut s, 1.0, 0.0);
        s.select_side(0);

        let fire = s.advance(0).unwrap();
        // 20ms interval, 80% of it
        assert!((fire.duration_secs - 0.016).abs() < 1e-12);
    }

    #[test]
    fn ingest_builds_per_side_rates() {
        let mut s = PulseScheduler::new(cfg());
        for i in 0..10u64 {
            let raw = RawTick::new()
                .with("ts", i * 100)
                .with("s", if i % 5 == 0 { "BID" } else { "ASK" })
                .with("v", 2u64);
            s.ingest(&raw);
        }

        let st = s.state();
        assert_eq!(st.window_len, 10);
        assert_eq!(st.last_rates.buy.trades_per_sec, 8.0);
        assert_eq!(st.last_rates.sell.trades_per_sec, 2.0);
        assert_eq!(st.last_rates.buy.volume_per_sec, 16.0);
        assert!(st.baselines.buy.pace.initialized);
    }

    #[test]
    fn reset_clears_baselines() {
        let mut s = PulseScheduler::new(cfg());
        s.update_from_rates(PerSideRates::default(), 0);
        with_scores(&mut s, 1.0, 0.0);
        s.select_side(0);

        s.reset();
        let once = serde_json::to_value(s.state()).unwrap();
        s.reset();
        let twice = serde_json::to_value(s.state()).unwrap();

        assert_eq!(once, twice);
        assert!(!s.state().baselines.buy.pace.initialized);
        assert_eq!(s.active_side(), None);
    }
}
