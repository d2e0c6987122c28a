pub mod dominance;
pub mod transition;

use flowcore::Tick;
use serde::{Deserialize, Serialize};

use crate::pulse::scheduler::SideSwitch;
use dominance::FlowEvent;
use transition::TransitionEvent;

/// Identifies an analyzer inside a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Dominance,
    Transition,
    Pulse,
}

impl AnalyzerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalyzerKind::Dominance => "dominance",
            AnalyzerKind::Transition => "transition",
            AnalyzerKind::Pulse => "pulse",
        }
    }
}

/// A discrete signal emitted on tick ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowSignal {
    Flow(FlowEvent),
    Transition(TransitionEvent),
    /// The pulse scheduler changed (or released) its active side.
    PulseSwitch(SideSwitch),
}

impl FlowSignal {
    pub fn kind(&self) -> AnalyzerKind {
        match self {
            FlowSignal::Flow(_) => AnalyzerKind::Dominance,
            FlowSignal::Transition(_) => AnalyzerKind::Transition,
            FlowSignal::PulseSwitch(_) => AnalyzerKind::Pulse,
        }
    }

    pub fn ts_ms(&self) -> u64 {
        match self {
            FlowSignal::Flow(e) => e.ts_ms,
            FlowSignal::Transition(e) => e.ts_ms,
            FlowSignal::PulseSwitch(e) => e.ts_ms,
        }
    }
}

/// A streaming analyzer over normalized ticks.
///
/// Each analyzer owns its window and state; feeding the same tick to several
/// analyzers never shares anything between them.
pub trait FlowAnalyzer: Send + Sync {
    /// Identifies the type of analyzer.
    fn kind(&self) -> AnalyzerKind;

    /// Called for every accepted tick.
    /// Returns Some(FlowSignal) when the analyzer fires.
    fn on_tick(&mut self, tick: &Tick) -> Option<FlowSignal>;

    /// Drop window, history and state machine state. Config is kept.
    fn reset(&mut self);

    /// Read-only view of config, state and last statistics.
    fn snapshot(&self) -> serde_json::Value;
}
