pub mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};

use cli::*;
use common::logger::{child_span, init_logger, root_span};
use engine::dispatcher;
use engine::pulse::driver::PulseDriver;
use flowcore::RawTick;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger("flowtone");

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let (registry, pulse) = build_registry_from_cli(&cli, &config);
    let registry = Arc::new(Mutex::new(registry));

    let (tick_tx, tick_rx) = mpsc::channel(1024);

    let registry_clone = Arc::clone(&registry);
    let dispatch = tokio::spawn(dispatcher::run_dispatcher(tick_rx, registry_clone));

    let mut driver = pulse.map(|scheduler| PulseDriver::from_config(scheduler, pulse_printer()));
    if let Some(driver) = driver.as_mut() {
        let _span = child_span("pulse_driver").entered();
        driver.start();
    }

    let source = cli
        .input
        .as_ref()
        .map_or_else(|| "stdin".to_string(), |p| p.display().to_string());

    let lines = ingest(cli.input.clone(), tick_tx)
        .instrument(root_span("ingest", &source))
        .await?;

    dispatch.await?;

    if let Some(driver) = driver.as_mut() {
        driver.stop();
    }

    info!(lines, source = %source, "input exhausted");

    if cli.dump_state {
        let snapshots = registry.lock().snapshots();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    }

    Ok(())
}

async fn ingest(input: Option<PathBuf>, tx: mpsc::Sender<RawTick>) -> anyhow::Result<u64> {
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            pump_lines(BufReader::new(file), tx).await
        }
        None => pump_lines(BufReader::new(tokio::io::stdin()), tx).await,
    }
}

/// Parse newline-delimited JSON records and forward them to the dispatcher.
/// Unparseable lines are skipped. Returns the number of lines read.
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<RawTick>) -> anyhow::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0u64;

    while let Some(line) = lines.next_line().await? {
        count += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let raw: RawTick = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(line = count, error = %e, "skipping unparseable line");
                continue;
            }
        };

        if tx.send(raw).await.is_err() {
            debug!("dispatcher gone, stopping input");
            break;
        }
    }

    Ok(count)
}
