use std::collections::BTreeMap;
use std::sync::Arc;

use flowcore::RawTick;
use tracing::{debug, warn};

use crate::analyzer::{AnalyzerKind, FlowAnalyzer, FlowSignal};
use crate::normalized_tick::normalize;

/// A thread-safe callback that receives every signal of one analyzer kind.
pub type SignalHandler = Arc<dyn Fn(&FlowSignal) + Send + Sync + 'static>;

type PanicHook = Arc<dyn Fn(AnalyzerKind, &FlowSignal) + Send + Sync + 'static>;

#[derive(Default)]
pub struct AnalyzerRegistry {
    /// At most one analyzer per kind, visited in kind order.
    analyzers: BTreeMap<AnalyzerKind, Box<dyn FlowAnalyzer>>,
    handlers: BTreeMap<AnalyzerKind, Vec<SignalHandler>>,
    /// Invoked when a handler panics.
    on_handler_panic: Option<PanicHook>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_panic_hook<F>(mut self, f: F) -> Self
    where
        F: Fn(AnalyzerKind, &FlowSignal) + Send + Sync + 'static,
    {
        self.on_handler_panic = Some(Arc::new(f));
        self
    }

    /// Replaces any analyzer already registered for the same kind.
    pub fn register_analyzer(&mut self, analyzer: Box<dyn FlowAnalyzer>) {
        let kind = analyzer.kind();
        if self.analyzers.insert(kind, analyzer).is_some() {
            debug!(kind = kind.as_str(), "analyzer replaced");
        }
    }

    pub fn register_handler(&mut self, kind: AnalyzerKind, handler: SignalHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn has_analyzer(&self, kind: AnalyzerKind) -> bool {
        self.analyzers.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = AnalyzerKind> + '_ {
        self.analyzers.keys().copied()
    }

    /// Normalize `raw` once and feed it to every analyzer. Signals are passed
    /// to the handlers of their kind and also returned.
    ///
    /// Analyzers are trusted: a panicking analyzer propagates. Handlers are
    /// not: each call runs under `catch_unwind`, so one bad handler never
    /// keeps the others from running.
    pub fn process_tick(&mut self, raw: &RawTick) -> Vec<FlowSignal> {
        let tick = match normalize(raw) {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "dropping malformed tick");
                return Vec::new();
            }
        };

        let mut signals = Vec::new();

        for (kind, analyzer) in self.analyzers.iter_mut() {
            let Some(signal) = analyzer.on_tick(&tick) else {
                continue;
            };

            if let Some(handlers) = self.handlers.get(kind) {
                for handler in handlers {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        handler(&signal);
                    }));

                    if result.is_err() {
                        warn!(kind = kind.as_str(), "signal handler panicked");
                        if let Some(hook) = &self.on_handler_panic {
                            hook(*kind, &signal);
                        }
                    }
                }
            }

            signals.push(signal);
        }

        signals
    }

    pub fn reset_all(&mut self) {
        for analyzer in self.analyzers.values_mut() {
            analyzer.reset();
        }
    }

    /// One snapshot per registered analyzer, keyed by kind name.
    pub fn snapshots(&self) -> serde_json::Value {
        let map = self
            .analyzers
            .iter()
            .map(|(kind, a)| (kind.as_str().to_string(), a.snapshot()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}
