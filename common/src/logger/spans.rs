use tracing::{Level, Span};

/// Root span for one ingestion run. `source` names where the ticks come from
/// (a file path or `stdin`).
pub fn root_span(name: &'static str, source: &str) -> Span {
    tracing::span!(Level::INFO, "run", name = name, source = %source)
}

/// Child span; events inside it still carry the run's source.
pub fn child_span(name: &'static str) -> Span {
    tracing::span!(Level::INFO, "task", name = name)
}
