use flowcore::{RawField, RawTick, Side, Tick};

use crate::error::NormalizeError;

/// Accepted field names, resolved in order. The short names are the ones the
/// time-and-sales exporter writes.
pub const TIMESTAMP_ALIASES: &[&str] = &["ts", "timestamp", "time", "t"];
pub const SIDE_ALIASES: &[&str] = &["side", "s", "aggressor", "direction"];
pub const VOLUME_ALIASES: &[&str] = &["volume", "v", "size", "qty", "quantity"];
pub const PRICE_ALIASES: &[&str] = &["price", "p"];
pub const SYMBOL_ALIASES: &[&str] = &["symbol", "sym", "ticker"];
pub const SEQ_ALIASES: &[&str] = &["seq", "sequence"];

/// Resolve a side value.
///
/// Text is matched case-insensitively. `ASK` means the trade printed at the
/// offer (buyer-initiated), `BID` at the bid (seller-initiated). Numbers use
/// their sign.
fn parse_side(field: &RawField) -> Result<Side, NormalizeError> {
    match field {
        RawField::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" | "ASK" | "UP" => Ok(Side::Buy),
            "SELL" | "S" | "BID" | "DOWN" => Ok(Side::Sell),
            _ => Err(NormalizeError::UnknownSide(s.clone())),
        },
        RawField::Number(n) if *n > 0.0 => Ok(Side::Buy),
        RawField::Number(n) if *n < 0.0 => Ok(Side::Sell),
        other => Err(NormalizeError::UnknownSide(format!("{other:?}"))),
    }
}

/// Validate and canonicalize one upstream record.
///
/// Pure: the same record always yields the same result. Price and symbol are
/// optional (`0.0` / empty when absent or unreadable).
pub fn normalize(raw: &RawTick) -> Result<Tick, NormalizeError> {
    let side = raw
        .first_of(SIDE_ALIASES)
        .ok_or(NormalizeError::MissingField("side"))
        .and_then(parse_side)?;

    let ts = raw
        .first_of(TIMESTAMP_ALIASES)
        .ok_or(NormalizeError::MissingField("timestamp"))?
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or(NormalizeError::NonFiniteTimestamp)?;
    if ts < 0.0 {
        return Err(NormalizeError::NegativeTimestamp(ts));
    }

    let volume = raw
        .first_of(VOLUME_ALIASES)
        .ok_or(NormalizeError::MissingField("volume"))?
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or(NormalizeError::NonFiniteVolume)?;
    if volume < 0.0 {
        return Err(NormalizeError::NegativeVolume(volume));
    }

    let price = raw
        .first_of(PRICE_ALIASES)
        .and_then(RawField::as_f64)
        .filter(|p| p.is_finite())
        .unwrap_or(0.0);

    let symbol = raw
        .first_of(SYMBOL_ALIASES)
        .and_then(RawField::as_text)
        .unwrap_or_default()
        .to_string();

    let seq = raw
        .first_of(SEQ_ALIASES)
        .and_then(RawField::as_f64)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s as u64);

    Ok(Tick {
        ts_ms: ts.floor() as u64,
        side,
        volume,
        price,
        symbol,
        seq,
    })
}
