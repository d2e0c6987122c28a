//! Periodic pulse driver
//!
//! Polls [`PulseScheduler::advance`](super::scheduler::PulseScheduler::advance)
//! on a fixed period and hands every fire instruction to a handler. The driver
//! owns no pulse state of its own; stopping and restarting it is safe at any
//! point.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, Span, info, warn};

use super::SharedPulseScheduler;
use super::scheduler::PulseFire;
use crate::time::now_ms;

/// Receives every fire instruction. Panics are caught and logged.
pub type PulseHandler = Arc<dyn Fn(&PulseFire) + Send + Sync + 'static>;

pub struct PulseDriver {
    scheduler: SharedPulseScheduler,
    handler: PulseHandler,
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl PulseDriver {
    /// `period` of zero is raised to one millisecond.
    pub fn new(scheduler: SharedPulseScheduler, period: Duration, handler: PulseHandler) -> Self {
        Self {
            scheduler,
            handler,
            period: period.max(Duration::from_millis(1)),
            task: None,
        }
    }

    /// Uses `driver_period_ms` from the scheduler's config.
    pub fn from_config(scheduler: SharedPulseScheduler, handler: PulseHandler) -> Self {
        let period = Duration::from_millis(scheduler.lock().config().driver_period_ms);
        Self::new(scheduler, period, handler)
    }

    /// Spawn the polling loop on the current tokio runtime, inside the
    /// caller's current span. No-op when already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let scheduler = self.scheduler.clone();
        let handler = self.handler.clone();
        let period = self.period;

        info!(period_ms = period.as_millis() as u64, "pulse driver started");

        let task = async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let fire = scheduler.lock().advance(now_ms());
                let Some(fire) = fire else {
                    continue;
                };

                if catch_unwind(AssertUnwindSafe(|| handler(&fire))).is_err() {
                    warn!(side = %fire.side, ts_ms = fire.ts_ms, "pulse handler panicked");
                }
            }
        };

        self.task = Some(tokio::spawn(task.instrument(Span::current())));
    }

    /// Abort the polling loop. No-op when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("pulse driver stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn scheduler(&self) -> &SharedPulseScheduler {
        &self.scheduler
    }
}

impl Drop for PulseDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
