use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::warn;

use engine::analyzer::dominance::DominanceDetector;
use engine::analyzer::transition::TransitionDetector;
use engine::analyzer::{AnalyzerKind, FlowSignal};
use engine::config::EngineConfig;
use engine::pulse::SharedPulseScheduler;
use engine::pulse::driver::PulseHandler;
use engine::pulse::scheduler::PulseFire;
use engine::registry::{AnalyzerRegistry, SignalHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnalyzerCli {
    Dominance,
    Transition,
    Pulse,
}

#[derive(Debug, Parser)]
#[clap(name = "flowtone", version)]
pub struct Cli {
    /// Which analyzers to run (comma-separated)
    #[clap(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [AnalyzerCli::Dominance, AnalyzerCli::Transition, AnalyzerCli::Pulse]
    )]
    pub analyzers: Vec<AnalyzerCli>,

    /// JSON config file; missing sections and fields use defaults
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Newline-delimited JSON ticks. Reads stdin when omitted
    #[clap(long)]
    pub input: Option<PathBuf>,

    /// Print every analyzer's state as JSON once the input is exhausted
    #[clap(long)]
    pub dump_state: bool,
}

impl Cli {
    pub fn load_config(&self) -> anyhow::Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => Ok(EngineConfig::default()),
        }
    }
}

/// Convert CLI analyzer selection → internal AnalyzerKind
pub(crate) fn cli_to_kind(a: AnalyzerCli) -> AnalyzerKind {
    match a {
        AnalyzerCli::Dominance => AnalyzerKind::Dominance,
        AnalyzerCli::Transition => AnalyzerKind::Transition,
        AnalyzerCli::Pulse => AnalyzerKind::Pulse,
    }
}

/// One JSON object per line on stdout.
pub(crate) fn print_json_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to serialize output"),
    }
}

#[derive(Serialize)]
struct FireLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    fire: &'a PulseFire,
}

pub(crate) fn pulse_printer() -> PulseHandler {
    Arc::new(|fire: &PulseFire| {
        print_json_line(&FireLine {
            kind: "pulse",
            fire,
        })
    })
}

/// Build an AnalyzerRegistry from CLI configuration. The pulse scheduler is
/// also returned so the host can drive it.
pub(crate) fn build_registry_from_cli(
    cli: &Cli,
    config: &EngineConfig,
) -> (AnalyzerRegistry, Option<SharedPulseScheduler>) {
    let mut reg = AnalyzerRegistry::new()
        .with_panic_hook(|kind, _| warn!(kind = kind.as_str(), "output handler panicked"));
    let mut pulse = None;

    let printer: SignalHandler = Arc::new(|sig: &FlowSignal| print_json_line(sig));

    for a in &cli.analyzers {
        let kind = cli_to_kind(*a);
        if reg.has_analyzer(kind) {
            continue;
        }

        match a {
            AnalyzerCli::Dominance => {
                reg.register_analyzer(Box::new(DominanceDetector::new(config.dominance.clone())));
            }
            AnalyzerCli::Transition => {
                reg.register_analyzer(Box::new(TransitionDetector::new(
                    config.transition.clone(),
                )));
            }
            AnalyzerCli::Pulse => {
                let scheduler = SharedPulseScheduler::new(config.pulse.clone());
                reg.register_analyzer(Box::new(scheduler.clone()));
                pulse = Some(scheduler);
            }
        }

        reg.register_handler(kind, printer.clone());
    }

    (reg, pulse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_analyzers() {
        let cli = Cli::parse_from(["flowtone", "--analyzers", "pulse,dominance", "--dump-state"]);

        assert_eq!(cli.analyzers, vec![AnalyzerCli::Pulse, AnalyzerCli::Dominance]);
        assert!(cli.dump_state);
        assert!(cli.input.is_none());
    }

    #[test]
    fn defaults_to_every_analyzer() {
        let cli = Cli::parse_from(["flowtone"]);
        let (reg, pulse) = build_registry_from_cli(&cli, &EngineConfig::default());

        assert!(reg.has_analyzer(AnalyzerKind::Dominance));
        assert!(reg.has_analyzer(AnalyzerKind::Transition));
        assert!(reg.has_analyzer(AnalyzerKind::Pulse));
        assert!(pulse.is_some());
    }

    #[test]
    fn duplicate_selection_registers_once() {
        let cli = Cli::parse_from(["flowtone", "--analyzers", "transition,transition"]);
        let (reg, pulse) = build_registry_from_cli(&cli, &EngineConfig::default());

        assert_eq!(reg.kinds().collect::<Vec<_>>(), vec![AnalyzerKind::Transition]);
        assert!(pulse.is_none());
    }

    #[test]
    fn rejects_unknown_analyzer() {
        assert!(Cli::try_parse_from(["flowtone", "--analyzers", "spread"]).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["flowtone", "--config", "/nonexistent/flowtone.json"]);
        assert!(cli.load_config().is_err());
    }
}
