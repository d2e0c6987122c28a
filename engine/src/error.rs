use thiserror::Error;

/// Reasons a raw record is rejected at the ingestion boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("side not resolvable to BUY/SELL: {0}")]
    UnknownSide(String),

    #[error("timestamp is not a finite number")]
    NonFiniteTimestamp,

    #[error("timestamp is negative: {0}")]
    NegativeTimestamp(f64),

    #[error("volume is not a finite number")]
    NonFiniteVolume,

    #[error("volume is negative: {0}")]
    NegativeVolume(f64),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
}
