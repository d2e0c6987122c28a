//! Order-flow signal engine.
//!
//! Raw ticks are normalized once, pushed into the rolling window owned by each
//! analyzer, aggregated, and turned into sparse signals:
//!
//! - [`analyzer::dominance::DominanceDetector`]: sustained one-sided flow, with hysteresis.
//! - [`analyzer::transition::TransitionDetector`]: thrust / pullback / absorption events.
//! - [`pulse::scheduler::PulseScheduler`]: adaptive-baseline pulse rate for the active side.

pub mod analyzer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod normalized_tick;
pub mod pulse;
pub mod registry;
pub mod rolling_window;
pub mod stats;
pub mod time;
