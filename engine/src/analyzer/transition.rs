//! Transition Detector
//!
//! Event-based regime detector over signed window imbalance.
//!
//! ## Inputs per tick
//! - `imbalance`: `(buy - sell) / (buy + sell)` over the window, in `[-1, 1]`
//! - `velocity`: trades per second over the window
//! - `previous`: the history sample nearest to `now - lookback_ms`
//!
//! ## Rules (first match wins)
//! 1. **Thrust**: imbalance beyond `±thrust_threshold`, moved at least
//!    `thrust_change` the same way since `previous`, velocity at least
//!    `thrust_min_velocity`.
//! 2. **Pullback exhaustion**: `previous` was still an excursion beyond
//!    `pullback_threshold` in the last thrust direction, and the current
//!    imbalance has faded inside `±pullback_fade` with a change larger than
//!    `pullback_fade`.
//! 3. **Absorption**: state is neutral, imbalance inside
//!    `±absorption_threshold`, velocity and trade count above their minimums.
//!
//! History is always updated; the event-interval gate only decides whether a
//! matched rule may fire.

use flowcore::{RawTick, Tick};
use serde::Serialize;
use tracing::{debug, info};

use super::{AnalyzerKind, FlowAnalyzer, FlowSignal};
use crate::config::{TransitionConfig, TransitionPatch};
use crate::normalized_tick::normalize;
use crate::rolling_window::RollingWindow;
use crate::stats::{WindowStats, aggregate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeState {
    #[default]
    Neutral,
    ThrustUp,
    ThrustDown,
    Absorption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrustDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    ThrustUp,
    ThrustDown,
    PullbackExhaustion,
    Absorption,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImbalanceSample {
    pub ts_ms: u64,
    pub imbalance: f64,
    pub velocity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub ts_ms: u64,
    pub kind: TransitionKind,
    pub imbalance: f64,
    pub previous_imbalance: Option<f64>,
    pub change: f64,
    pub velocity: f64,
    pub total_count: usize,
    /// Magnitude in `[0, 1]` for the audio mapping.
    pub strength: f64,
    pub thrust_direction: Option<ThrustDirection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransitionState {
    pub current: RegimeState,
    pub entered_at: Option<u64>,
    pub last_event_at: Option<u64>,
    pub thrust_direction: Option<ThrustDirection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionSnapshot {
    pub config: TransitionConfig,
    pub state: TransitionState,
    pub last_stats: WindowStats,
    pub last_sample: Option<ImbalanceSample>,
    pub window_len: usize,
    pub history_len: usize,
}

pub struct TransitionDetector {
    config: TransitionConfig,
    window: RollingWindow<Tick>,
    history: RollingWindow<ImbalanceSample>,
    state: TransitionState,
    last_stats: WindowStats,
    last_sample: Option<ImbalanceSample>,
}

impl TransitionDetector {
    pub fn new(config: TransitionConfig) -> Self {
        Self {
            window: RollingWindow::new(config.window_ms, config.max_window_trades),
            history: RollingWindow::new(config.history_depth_ms, config.max_history_samples),
            config,
            state: TransitionState::default(),
            last_stats: WindowStats::default(),
            last_sample: None,
        }
    }

    /// Normalize and process one raw record. Malformed records are dropped.
    pub fn ingest(&mut self, raw: &RawTick) -> Option<TransitionEvent> {
        match normalize(raw) {
            Ok(tick) => self.process(tick),
            Err(e) => {
                debug!(error = %e, "dropping malformed tick");
                None
            }
        }
    }

    pub fn process(&mut self, tick: Tick) -> Option<TransitionEvent> {
        let now = tick.ts_ms;
        self.window.push(now, tick);

        let stats = aggregate(
            self.window.iter(),
            self.config.window_ms,
            self.config.dominance_metric,
        );
        self.last_stats = stats;

        let sample = ImbalanceSample {
            ts_ms: now,
            imbalance: stats.imbalance,
            velocity: stats.trades_per_sec,
        };

        self.history.prune(now);
        let previous = self
            .history
            .closest_to(now.saturating_sub(self.config.lookback_ms))
            .copied();
        self.history.push(now, sample);
        self.last_sample = Some(sample);

        self.expire_state(now);

        if let Some(last) = self.state.last_event_at
            && now.saturating_sub(last) < self.config.min_event_interval_ms
        {
            return None;
        }

        let kind = self.detect(&sample, previous.as_ref(), &stats)?;
        let event = self.apply(kind, now, &sample, previous.as_ref(), &stats);

        info!(
            kind = ?event.kind,
            imbalance = event.imbalance,
            change = event.change,
            velocity = event.velocity,
            "transition event"
        );

        Some(event)
    }

    fn detect(
        &self,
        sample: &ImbalanceSample,
        previous: Option<&ImbalanceSample>,
        stats: &WindowStats,
    ) -> Option<TransitionKind> {
        let cfg = &self.config;
        let imb = sample.imbalance;
        let change = previous.map(|p| imb - p.imbalance);

        if let Some(change) = change
            && sample.velocity >= cfg.thrust_min_velocity
        {
            if imb >= cfg.thrust_threshold && change >= cfg.thrust_change {
                return Some(TransitionKind::ThrustUp);
            }
            if imb <= -cfg.thrust_threshold && change <= -cfg.thrust_change {
                return Some(TransitionKind::ThrustDown);
            }
        }

        if let (Some(direction), Some(prev), Some(change)) =
            (self.state.thrust_direction, previous, change)
        {
            let extended = match direction {
                ThrustDirection::Up => prev.imbalance >= cfg.pullback_threshold,
                ThrustDirection::Down => prev.imbalance <= -cfg.pullback_threshold,
            };
            if extended && imb.abs() < cfg.pullback_fade && change.abs() > cfg.pullback_fade {
                return Some(TransitionKind::PullbackExhaustion);
            }
        }

        if self.state.current == RegimeState::Neutral
            && imb.abs() <= cfg.absorption_threshold
            && sample.velocity >= cfg.absorption_min_velocity
            && stats.total_count >= cfg.absorption_min_trades
        {
            return Some(TransitionKind::Absorption);
        }

        None
    }

    fn apply(
        &mut self,
        kind: TransitionKind,
        now: u64,
        sample: &ImbalanceSample,
        previous: Option<&ImbalanceSample>,
        stats: &WindowStats,
    ) -> TransitionEvent {
        let change = previous.map_or(0.0, |p| sample.imbalance - p.imbalance);

        let (next, strength) = match kind {
            TransitionKind::ThrustUp => {
                self.state.thrust_direction = Some(ThrustDirection::Up);
                (RegimeState::ThrustUp, sample.imbalance.abs())
            }
            TransitionKind::ThrustDown => {
                self.state.thrust_direction = Some(ThrustDirection::Down);
                (RegimeState::ThrustDown, sample.imbalance.abs())
            }
            TransitionKind::PullbackExhaustion => (RegimeState::Neutral, change.abs()),
            TransitionKind::Absorption => {
                let closeness = if self.config.absorption_threshold > 0.0 {
                    1.0 - sample.imbalance.abs() / self.config.absorption_threshold
                } else {
                    1.0
                };
                (RegimeState::Absorption, closeness)
            }
        };

        self.state.current = next;
        self.state.entered_at = Some(now);
        self.state.last_event_at = Some(now);

        // one exhaustion per thrust
        let direction = self.state.thrust_direction;
        if kind == TransitionKind::PullbackExhaustion {
            self.state.thrust_direction = None;
        }

        TransitionEvent {
            ts_ms: now,
            kind,
            imbalance: sample.imbalance,
            previous_imbalance: previous.map(|p| p.imbalance),
            change,
            velocity: sample.velocity,
            total_count: stats.total_count,
            strength: strength.clamp(0.0, 1.0),
            thrust_direction: direction,
        }
    }

    /// Let a stale non-neutral state decay back to neutral.
    fn expire_state(&mut self, now: u64) {
        if self.config.state_timeout_ms == 0 || self.state.current == RegimeState::Neutral {
            return;
        }
        let entered = self.state.entered_at.unwrap_or(now);
        if now.saturating_sub(entered) >= self.config.state_timeout_ms {
            debug!(from = ?self.state.current, "transition state timed out");
            self.state.current = RegimeState::Neutral;
            self.state.entered_at = Some(now);
        }
    }

    pub fn update_config(&mut self, patch: &TransitionPatch) {
        self.config = self.config.merged(patch);
        self.window
            .set_limits(self.config.window_ms, self.config.max_window_trades);
        self.history
            .set_limits(self.config.history_depth_ms, self.config.max_history_samples);
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.history.clear();
        self.state = TransitionState::default();
        self.last_stats = WindowStats::default();
        self.last_sample = None;
    }

    pub fn config(&self) -> &TransitionConfig {
        &self.config
    }

    pub fn current(&self) -> RegimeState {
        self.state.current
    }

    pub fn state(&self) -> TransitionSnapshot {
        TransitionSnapshot {
            config: self.config.clone(),
            state: self.state.clone(),
            last_stats: self.last_stats,
            last_sample: self.last_sample,
            window_len: self.window.len(),
            history_len: self.history.len(),
        }
    }
}

impl Default for TransitionDetector {
    fn default() -> Self {
        Self::new(TransitionConfig::default())
    }
}

impl FlowAnalyzer for TransitionDetector {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Transition
    }

    fn on_tick(&mut self, tick: &Tick) -> Option<FlowSignal> {
        self.process(tick.clone()).map(FlowSignal::Transition)
    }

    fn reset(&mut self) {
        TransitionDetector::reset(self);
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.state()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::Side;

    fn cfg() -> TransitionConfig {
        TransitionConfig {
            min_event_interval_ms: 0,
            ..Default::default()
        }
    }

    fn sample(ts_ms: u64, imbalance: f64, velocity: f64) -> ImbalanceSample {
        ImbalanceSample {
            ts_ms,
            imbalance,
            velocity,
        }
    }

    fn stats_with_count(total_count: usize) -> WindowStats {
        WindowStats {
            total_count,
            ..Default::default()
        }
    }

    #[test]
    fn thrust_needs_level_change_and_velocity() {
        let d = TransitionDetector::new(cfg());
        let prev = sample(0, 0.1, 50.0);
        let s = stats_with_count(100);

        assert_eq!(
            d.detect(&sample(1_000, 0.7, 50.0), Some(&prev), &s),
            Some(TransitionKind::ThrustUp)
        );
        // level without change
        let high_prev = sample(0, 0.6, 50.0);
        assert_eq!(d.detect(&sample(1_000, 0.7, 50.0), Some(&high_prev), &s), None);
        // too slow
        assert_eq!(d.detect(&sample(1_000, 0.7, 5.0), Some(&prev), &s), None);
        // no reference sample yet
        assert_eq!(d.detect(&sample(1_000, 0.7, 50.0), None, &s), None);

        let down_prev = sample(0, -0.1, 50.0);
        assert_eq!(
            d.detect(&sample(1_000, -0.75, 50.0), Some(&down_prev), &s),
            Some(TransitionKind::ThrustDown)
        );
    }

    #[test]
    fn pullback_requires_extended_previous_sample() {
        let mut d = TransitionDetector::new(cfg());
        d.state.thrust_direction = Some(ThrustDirection::Down);
        d.state.current = RegimeState::ThrustDown;
        let s = stats_with_count(100);

        // sell burst a lookback ago, flow back near zero now
        let extended = sample(0, -0.65, 50.0);
        assert_eq!(
            d.detect(&sample(1_000, -0.1, 50.0), Some(&extended), &s),
            Some(TransitionKind::PullbackExhaustion)
        );

        // previous was already back inside the threshold
        let shallow = sample(0, -0.25, 50.0);
        assert_eq!(d.detect(&sample(1_000, -0.05, 50.0), Some(&shallow), &s), None);

        // previous sat on the other side of zero
        let opposite = sample(0, 0.4, 50.0);
        assert_eq!(d.detect(&sample(1_000, 0.05, 50.0), Some(&opposite), &s), None);

        // not faded enough
        assert_eq!(d.detect(&sample(1_000, -0.2, 50.0), Some(&extended), &s), None);

        // mirrored for an up thrust
        d.state.thrust_direction = Some(ThrustDirection::Up);
        let up = sample(0, 0.7, 50.0);
        assert_eq!(
            d.detect(&sample(1_000, 0.1, 50.0), Some(&up), &s),
            Some(TransitionKind::PullbackExhaustion)
        );
        assert_eq!(d.detect(&sample(1_000, -0.1, 50.0), Some(&extended), &s), None);
    }

    #[test]
    fn sell_burst_fading_to_balance_is_exhaustion() {
        let mut d = TransitionDetector::new(TransitionConfig::default());

        let mut kinds = Vec::new();
        for i in 0..400u64 {
            let side = match i {
                100..200 if i % 10 != 0 => Side::Sell,
                100..200 => Side::Buy,
                _ if i % 2 == 0 => Side::Buy,
                _ => Side::Sell,
            };
            if let Some(e) = d.process(Tick::new(i * 10, side, 1.0)) {
                kinds.push(e.kind);
            }
        }

        let thrust = kinds
            .iter()
            .position(|k| *k == TransitionKind::ThrustDown)
            .unwrap();
        let pullback = kinds
            .iter()
            .position(|k| *k == TransitionKind::PullbackExhaustion)
            .unwrap();
        assert!(pullback > thrust);
    }

    #[test]
    fn absorption_only_from_neutral() {
        let mut d = TransitionDetector::new(cfg());
        let s = stats_with_count(100);
        let quiet = sample(1_000, 0.02, 50.0);

        assert_eq!(d.detect(&quiet, None, &s), Some(TransitionKind::Absorption));

        d.state.current = RegimeState::ThrustDown;
        assert_eq!(d.detect(&quiet, None, &s), None);

        d.state.current = RegimeState::Neutral;
        assert_eq!(d.detect(&quiet, None, &stats_with_count(10)), None);
    }

    #[test]
    fn thrust_takes_precedence_over_pullback() {
        let mut d = TransitionDetector::new(cfg());
        d.state.thrust_direction = Some(ThrustDirection::Down);
        let s = stats_with_count(100);

        // previous is still extended in the DOWN direction, but flow has
        // swung straight into a fresh up-thrust
        let prev = sample(0, -0.35, 50.0);
        assert_eq!(
            d.detect(&sample(1_000, 0.9, 50.0), Some(&prev), &s),
            Some(TransitionKind::ThrustUp)
        );
    }

    #[test]
    fn event_interval_gates_emission_but_history_keeps_growing() {
        let mut d = TransitionDetector::new(TransitionConfig {
            min_event_interval_ms: 10_000,
            absorption_min_trades: 4,
            absorption_min_velocity: 0.0,
            ..Default::default()
        });

        let mut events = Vec::new();
        for i in 0..20u64 {
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            if let Some(e) = d.process(Tick::new(i * 10, side, 1.0)) {
                events.push(e);
            }
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TransitionKind::Absorption);
        assert_eq!(d.state().history_len, 20);
    }

    #[test]
    fn stale_state_decays_to_neutral() {
        let mut d = TransitionDetector::new(TransitionConfig {
            state_timeout_ms: 1_000,
            absorption_min_trades: usize::MAX,
            ..cfg()
        });
        d.state.current = RegimeState::Absorption;
        d.state.entered_at = Some(0);
        d.state.thrust_direction = Some(ThrustDirection::Up);

        d.process(Tick::new(500, Side::Buy, 1.0));
        assert_eq!(d.current(), RegimeState::Absorption);

        d.process(Tick::new(1_000, Side::Sell, 1.0));
        assert_eq!(d.current(), RegimeState::Neutral);
        assert_eq!(d.state.thrust_direction, Some(ThrustDirection::Up));
    }

    #[test]
    fn reset_clears_window_history_and_state() {
        let mut d = TransitionDetector::new(cfg());
        for i in 0..10u64 {
            d.process(Tick::new(i * 100, Side::Sell, 2.0));
        }
        d.reset();
        let once = serde_json::to_value(d.state()).unwrap();
        d.reset();
        let twice = serde_json::to_value(d.state()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(d.state().history_len, 0);
        assert_eq!(d.state().window_len, 0);
        assert_eq!(d.current(), RegimeState::Neutral);
    }
}
