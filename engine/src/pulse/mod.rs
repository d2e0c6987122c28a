//! Pulse scheduling: adaptive baselines, side selection and the periodic
//! driver that turns the active side into a stream of fire instructions.

pub mod baseline;
pub mod driver;
pub mod scheduler;

use std::sync::Arc;

use flowcore::Tick;
use parking_lot::{Mutex, MutexGuard};

use crate::analyzer::{AnalyzerKind, FlowAnalyzer, FlowSignal};
use crate::config::PulseConfig;
use scheduler::PulseScheduler;

/// A scheduler shared between the ingest path and a [`driver::PulseDriver`].
///
/// Ingestion and `advance` never run concurrently on the same scheduler; both
/// go through the same lock.
#[derive(Clone)]
pub struct SharedPulseScheduler(Arc<Mutex<PulseScheduler>>);

impl SharedPulseScheduler {
    pub fn new(config: PulseConfig) -> Self {
        Self::from(PulseScheduler::new(config))
    }

    pub fn lock(&self) -> MutexGuard<'_, PulseScheduler> {
        self.0.lock()
    }
}

impl From<PulseScheduler> for SharedPulseScheduler {
    fn from(scheduler: PulseScheduler) -> Self {
        Self(Arc::new(Mutex::new(scheduler)))
    }
}

impl Default for SharedPulseScheduler {
    fn default() -> Self {
        Self::new(PulseConfig::default())
    }
}

impl FlowAnalyzer for SharedPulseScheduler {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Pulse
    }

    fn on_tick(&mut self, tick: &Tick) -> Option<FlowSignal> {
        self.lock()
            .process(tick.clone())
            .map(FlowSignal::PulseSwitch)
    }

    fn reset(&mut self) {
        self.lock().reset();
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.lock().state()).unwrap_or_default()
    }
}
