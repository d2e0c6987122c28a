use serde::{Deserialize, Serialize};

use super::Side;

/// A normalized trade print.
///
/// Built once per accepted raw record and never mutated afterwards. Every
/// analyzer stores its own copy inside its rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Trade time in milliseconds.
    pub ts_ms: u64,

    pub side: Side,

    /// Traded quantity, always finite and `>= 0`.
    pub volume: f64,

    /// Trade price. Carried through but not used by the analyzers.
    pub price: f64,

    pub symbol: String,

    /// Upstream sequence number, when the producer sends one.
    pub seq: Option<u64>,
}

impl Tick {
    pub fn new(ts_ms: u64, side: Side, volume: f64) -> Self {
        Self {
            ts_ms,
            side,
            volume,
            price: 0.0,
            symbol: String::new(),
            seq: None,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }
}
