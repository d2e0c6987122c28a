//! Dominance Detector
//!
//! Emits a "flow" event while one side keeps a sustained majority of the
//! traded metric inside the rolling window.
//!
//! ## State machine
//! ```text
//! NONE --(share >= enter, other side not >= enter)--> BUY | SELL
//! BUY | SELL --(own share < exit)--> NONE
//! BUY <--(other side qualifies, lock expired)--> SELL
//! ```
//! `exit < enter` gives the hysteresis band: a share oscillating between the
//! two thresholds can neither enter nor leave a state.
//!
//! ## Gates
//! Before the state machine runs: cooldown, minimum trade rate, minimum window
//! volume. After it: sustain time and emission pacing. A failed gate yields
//! no event, never an error.

use flowcore::{RawTick, Side, Tick};
use serde::Serialize;
use tracing::{debug, info};

use super::{AnalyzerKind, FlowAnalyzer, FlowSignal};
use crate::config::{DominanceConfig, DominancePatch};
use crate::normalized_tick::normalize;
use crate::rolling_window::RollingWindow;
use crate::stats::{WindowStats, aggregate};

/// Emitted when a dominant side has been sustained and pacing allows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEvent {
    pub ts_ms: u64,
    pub side: Side,
    /// Dominant side's share of the metric.
    pub strength: f64,
    pub trades_per_sec: f64,
    pub volume_per_sec: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_count: usize,
    pub sell_count: usize,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DominanceState {
    pub dominant_side: Option<Side>,
    pub dominant_since: Option<u64>,
    pub locked_until: u64,
    pub last_emit_at: Option<u64>,
    pub cooldown_until: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DominanceSnapshot {
    pub config: DominanceConfig,
    pub state: DominanceState,
    pub last_stats: WindowStats,
    pub window_len: usize,
}

pub struct DominanceDetector {
    config: DominanceConfig,
    window: RollingWindow<Tick>,
    state: DominanceState,
    last_stats: WindowStats,
}

impl DominanceDetector {
    pub fn new(config: DominanceConfig) -> Self {
        Self {
            window: RollingWindow::new(config.window_ms, config.max_window_trades),
            config,
            state: DominanceState::default(),
            last_stats: WindowStats::default(),
        }
    }

    /// Normalize and process one raw record. Malformed records are dropped.
    pub fn ingest(&mut self, raw: &RawTick) -> Option<FlowEvent> {
        match normalize(raw) {
            Ok(tick) => self.process(tick),
            Err(e) => {
                debug!(error = %e, "dropping malformed tick");
                None
            }
        }
    }

    /// Process one normalized tick.
    ///
    /// Ticks must arrive in non-decreasing timestamp order.
    pub fn process(&mut self, tick: Tick) -> Option<FlowEvent> {
        let now = tick.ts_ms;
        self.window.push(now, tick);

        let stats = aggregate(
            self.window.iter(),
            self.config.window_ms,
            self.config.dominance_metric,
        );
        self.last_stats = stats;

        if now < self.state.cooldown_until {
            return None;
        }
        if stats.trades_per_sec < self.config.min_trades_per_sec {
            return None;
        }
        if stats.total_volume < self.config.min_total_volume_in_window {
            return None;
        }

        self.step(now, &stats);

        let side = self.state.dominant_side?;
        let since = self.state.dominant_since.unwrap_or(now);

        if now.saturating_sub(since) < self.config.require_sustained_ms {
            return None;
        }

        if let Some(last) = self.state.last_emit_at
            && (now.saturating_sub(last) as f64) < self.config.min_emit_interval_ms()
        {
            return None;
        }

        self.state.last_emit_at = Some(now);
        if self.config.cooldown_ms > 0 {
            self.state.cooldown_until = now.saturating_add(self.config.cooldown_ms);
        }

        let event = FlowEvent {
            ts_ms: now,
            side,
            strength: stats.ratio(side),
            trades_per_sec: stats.trades_per_sec,
            volume_per_sec: stats.volume_per_sec,
            buy_volume: stats.buy_volume,
            sell_volume: stats.sell_volume,
            buy_count: stats.buy_count,
            sell_count: stats.sell_count,
            window_ms: self.config.window_ms,
        };

        info!(
            side = %event.side,
            strength = event.strength,
            trades_per_sec = event.trades_per_sec,
            "flow event"
        );

        Some(event)
    }

    /// The side (if any) that qualifies for entry on its own.
    fn entry_candidate(&self, stats: &WindowStats) -> Option<Side> {
        let enter = self.config.enter_dominance;
        match (stats.buy_ratio >= enter, stats.sell_ratio >= enter) {
            (true, false) => Some(Side::Buy),
            (false, true) => Some(Side::Sell),
            // both or neither: no entry
            _ => None,
        }
    }

    /// Run one transition of the state machine.
    fn step(&mut self, now: u64, stats: &WindowStats) {
        let candidate = self.entry_candidate(stats);

        match self.state.dominant_side {
            Some(current) if stats.ratio(current) < self.config.exit_dominance => {
                debug!(side = %current, ratio = stats.ratio(current), "dominance released");
                self.exit();
                if let Some(side) = candidate {
                    self.enter(side, now);
                }
            }
            Some(current) => {
                if let Some(side) = candidate
                    && side != current
                    && now >= self.state.locked_until
                {
                    self.enter(side, now);
                }
            }
            None => {
                if let Some(side) = candidate {
                    self.enter(side, now);
                }
            }
        }
    }

    fn enter(&mut self, side: Side, now: u64) {
        debug!(side = %side, "dominance entered");
        self.state.dominant_side = Some(side);
        self.state.dominant_since = Some(now);
        self.state.locked_until = if self.config.lock_side_ms > 0 {
            now.saturating_add(self.config.lock_side_ms)
        } else {
            0
        };
    }

    fn exit(&mut self) {
        self.state.dominant_side = None;
        self.state.dominant_since = None;
        self.state.locked_until = 0;
    }

    pub fn update_config(&mut self, patch: &DominancePatch) {
        self.config = self.config.merged(patch);
        self.window
            .set_limits(self.config.window_ms, self.config.max_window_trades);
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.state = DominanceState::default();
        self.last_stats = WindowStats::default();
    }

    pub fn config(&self) -> &DominanceConfig {
        &self.config
    }

    pub fn dominant_side(&self) -> Option<Side> {
        self.state.dominant_side
    }

    pub fn state(&self) -> DominanceSnapshot {
        DominanceSnapshot {
            config: self.config.clone(),
            state: self.state.clone(),
            last_stats: self.last_stats,
            window_len: self.window.len(),
        }
    }
}

impl Default for DominanceDetector {
    fn default() -> Self {
        Self::new(DominanceConfig::default())
    }
}

impl FlowAnalyzer for DominanceDetector {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Dominance
    }

    fn on_tick(&mut self, tick: &Tick) -> Option<FlowSignal> {
        self.process(tick.clone()).map(FlowSignal::Flow)
    }

    fn reset(&mut self) {
        DominanceDetector::reset(self);
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.state()).unwrap_or_default()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]
        #[test]
        fn consecutive_events_respect_max_rate(
            max_events_per_sec in 0.5..=50.0f64,
            steps in prop::collection::vec((0..=60u64, any::<bool>(), 0.1..=10.0f64), 1..300)
        ) {
            let cfg = DominanceConfig {
                window_ms: 500,
                enter_dominance: 0.6,
                exit_dominance: 0.5,
                min_trades_per_sec: 0.0,
                require_sustained_ms: 0,
                max_events_per_sec,
                ..Default::default()
            };
            let min_gap = cfg.min_emit_interval_ms();
            let mut d = DominanceDetector::new(cfg);

            let mut ts = 0u64;
            let mut last: Option<u64> = None;
            for (gap, is_buy, volume) in steps {
                ts += gap;
                let side = if is_buy { Side::Buy } else { Side::Sell };
                if let Some(ev) = d.process(Tick::new(ts, side, volume)) {
                    if let Some(prev) = last {
                        prop_assert!((ev.ts_ms - prev) as f64 >= min_gap);
                    }
                    last = Some(ev.ts_ms);
                }
            }
        }
    }
}
