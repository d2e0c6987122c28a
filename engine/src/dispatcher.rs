use std::sync::Arc;

use flowcore::RawTick;
use parking_lot::Mutex;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info};

use crate::registry::AnalyzerRegistry;

/// Main ingest loop: drains `rx` in arrival order and feeds every record to
/// the registry. Returns once all senders are dropped.
///
/// The registry lock is held for one record at a time, so hosts may take it
/// between records to snapshot or reset.
pub async fn run_dispatcher(mut rx: Receiver<RawTick>, registry: Arc<Mutex<AnalyzerRegistry>>) {
    let mut records = 0u64;
    let mut signals = 0u64;

    while let Some(raw) = rx.recv().await {
        records += 1;
        let emitted = registry.lock().process_tick(&raw);
        if !emitted.is_empty() {
            debug!(count = emitted.len(), "signals emitted");
            signals += emitted.len() as u64;
        }
    }

    info!(records, signals, "tick stream closed");
}
