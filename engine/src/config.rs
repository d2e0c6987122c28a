//! Analyzer configuration.
//!
//! Configs are plain immutable values. A running analyzer is reconfigured by
//! handing it a `*Patch` (every field optional); the analyzer swaps in
//! `current.merged(&patch)` and keeps its accumulated state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Generates the patch struct and `merged` for a config struct. Every config
/// field must be listed, otherwise `merged` fails to compile.
macro_rules! config_patch {
    ($cfg:ident => $patch:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        #[doc = concat!("Partial update for [`", stringify!($cfg), "`]. `None` keeps the current value.")]
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $patch {
            $(pub $field: Option<$ty>,)*
        }

        impl $cfg {
            /// New config with every `Some` field of `patch` applied.
            pub fn merged(&self, patch: &$patch) -> Self {
                Self {
                    $($field: patch.$field.clone().unwrap_or_else(|| self.$field.clone()),)*
                }
            }
        }
    };
}

/// Which quantity the dominance / imbalance ratio is computed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DominanceMetric {
    #[default]
    Volume,
    Count,
}

/// Rate normalisation divisor for a window length, never zero.
pub(crate) fn window_secs(window_ms: u64) -> f64 {
    window_ms.max(1) as f64 / 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DominanceConfig {
    /// Rolling window length.
    pub window_ms: u64,

    /// Hard cap on stored trades, oldest dropped first.
    pub max_window_trades: usize,

    pub dominance_metric: DominanceMetric,

    /// Share of the metric a side needs to become dominant.
    pub enter_dominance: f64,

    /// Share below which the dominant side is released. Must sit below
    /// `enter_dominance` for hysteresis to have any effect.
    pub exit_dominance: f64,

    pub min_trades_per_sec: f64,

    pub min_total_volume_in_window: f64,

    /// Dominance must have lasted this long before anything is emitted.
    pub require_sustained_ms: u64,

    /// Upper bound on emission rate. Values below 1 are treated as 1.
    pub max_events_per_sec: f64,

    /// Silence after each emission. 0 disables.
    pub cooldown_ms: u64,

    /// After entering a side, flips to the other side are blocked this long.
    /// 0 disables.
    pub lock_side_ms: u64,
}

impl Default for DominanceConfig {
    fn default() -> Self {
        Self {
            window_ms: 1_500,
            max_window_trades: 5_000,
            dominance_metric: DominanceMetric::Volume,
            enter_dominance: 0.70,
            exit_dominance: 0.55,
            min_trades_per_sec: 5.0,
            min_total_volume_in_window: 0.0,
            require_sustained_ms: 150,
            max_events_per_sec: 4.0,
            cooldown_ms: 0,
            lock_side_ms: 0,
        }
    }
}

impl DominanceConfig {
    /// Minimum spacing between two emitted events.
    pub fn min_emit_interval_ms(&self) -> f64 {
        let rate = if self.max_events_per_sec.is_finite() {
            self.max_events_per_sec.max(1.0)
        } else {
            1.0
        };
        1000.0 / rate
    }
}

config_patch!(DominanceConfig => DominancePatch {
    window_ms: u64,
    max_window_trades: usize,
    dominance_metric: DominanceMetric,
    enter_dominance: f64,
    exit_dominance: f64,
    min_trades_per_sec: f64,
    min_total_volume_in_window: f64,
    require_sustained_ms: u64,
    max_events_per_sec: f64,
    cooldown_ms: u64,
    lock_side_ms: u64,
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub window_ms: u64,
    pub max_window_trades: usize,
    pub dominance_metric: DominanceMetric,

    /// How far back the imbalance history reaches.
    pub history_depth_ms: u64,
    pub max_history_samples: usize,

    /// Offset of the "previous" reference sample.
    pub lookback_ms: u64,

    pub thrust_threshold: f64,
    pub thrust_change: f64,
    pub thrust_min_velocity: f64,

    pub pullback_threshold: f64,
    pub pullback_fade: f64,

    pub absorption_threshold: f64,
    pub absorption_min_velocity: f64,
    pub absorption_min_trades: usize,

    pub min_event_interval_ms: u64,

    /// A non-neutral state falls back to neutral after this long without a
    /// new event. 0 disables.
    pub state_timeout_ms: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            window_ms: 1_000,
            max_window_trades: 5_000,
            dominance_metric: DominanceMetric::Volume,
            history_depth_ms: 5_000,
            max_history_samples: 2_000,
            lookback_ms: 1_000,
            thrust_threshold: 0.6,
            thrust_change: 0.3,
            thrust_min_velocity: 10.0,
            pullback_threshold: 0.3,
            pullback_fade: 0.15,
            absorption_threshold: 0.1,
            absorption_min_velocity: 20.0,
            absorption_min_trades: 40,
            min_event_interval_ms: 500,
            state_timeout_ms: 3_000,
        }
    }
}

config_patch!(TransitionConfig => TransitionPatch {
    window_ms: u64,
    max_window_trades: usize,
    dominance_metric: DominanceMetric,
    history_depth_ms: u64,
    max_history_samples: usize,
    lookback_ms: u64,
    thrust_threshold: f64,
    thrust_change: f64,
    thrust_min_velocity: f64,
    pullback_threshold: f64,
    pullback_fade: f64,
    absorption_threshold: f64,
    absorption_min_velocity: f64,
    absorption_min_trades: usize,
    min_event_interval_ms: u64,
    state_timeout_ms: u64,
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Window used to turn ingested ticks into per-side rates.
    pub rate_window_ms: u64,
    pub max_window_trades: usize,

    /// Baseline time constant is `max(2000, baseline_window_ms)`.
    pub baseline_window_ms: u64,

    /// Deviations above the baseline before a side scores positive.
    pub sensitivity_k: f64,

    /// Absolute thresholds the adaptive threshold never drops below.
    pub min_abs_pace: f64,
    pub min_abs_loudness: f64,

    pub min_switch_ms: u64,
    pub switch_margin_z: f64,

    /// Z-score mapped to full intensity.
    pub full_scale_z: f64,

    /// Pulses per second at zero and full intensity.
    pub min_rate: f64,
    pub max_rate: f64,

    /// Exponent applied to intensity before mapping into the rate range.
    pub rate_curve: f64,

    /// Pseudo-volume range handed to the audio side.
    pub min_volume: f64,
    pub max_volume: f64,

    pub pulse_duration_ms: u64,

    /// Period of the driver loop polling `advance`.
    pub driver_period_ms: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            rate_window_ms: 1_000,
            max_window_trades: 5_000,
            baseline_window_ms: 10_000,
            sensitivity_k: 0.5,
            min_abs_pace: 1.0,
            min_abs_loudness: 1.0,
            min_switch_ms: 1_500,
            switch_margin_z: 0.5,
            full_scale_z: 3.0,
            min_rate: 2.0,
            max_rate: 20.0,
            rate_curve: 1.0,
            min_volume: 0.2,
            max_volume: 1.0,
            pulse_duration_ms: 60,
            driver_period_ms: 10,
        }
    }
}

impl PulseConfig {
    /// Baseline EMA time constant in milliseconds.
    pub fn tau_ms(&self) -> f64 {
        self.baseline_window_ms.max(2_000) as f64
    }

    /// `(min_rate, max_rate)` ordered and kept strictly positive.
    pub fn rate_range(&self) -> (f64, f64) {
        let lo = self.min_rate.max(0.1);
        let hi = self.max_rate.max(0.1);
        if lo <= hi { (lo, hi) } else { (hi, lo) }
    }
}

config_patch!(PulseConfig => PulsePatch {
    rate_window_ms: u64,
    max_window_trades: usize,
    baseline_window_ms: u64,
    sensitivity_k: f64,
    min_abs_pace: f64,
    min_abs_loudness: f64,
    min_switch_ms: u64,
    switch_margin_z: f64,
    full_scale_z: f64,
    min_rate: f64,
    max_rate: f64,
    rate_curve: f64,
    min_volume: f64,
    max_volume: f64,
    pulse_duration_ms: u64,
    driver_period_ms: u64,
});

/// Configuration for every analyzer a host may run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dominance: DominanceConfig,
    pub transition: TransitionConfig,
    pub pulse: PulseConfig,
}

impl EngineConfig {
    /// Parse a JSON document. Missing sections and fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
