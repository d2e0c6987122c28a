use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One value inside an upstream tick record.
///
/// Producers disagree on types (`"v": 10` vs `"v": "10"`), so numbers and text
/// are kept apart here and the normalizer decides what each field accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Number(f64),
    Text(String),
    Flag(bool),
    Other(serde_json::Value),
}

impl RawField {
    /// Numeric view of the field. Numeric strings are accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawField::Number(n) => Some(*n),
            RawField::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawField::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for RawField {
    fn from(v: f64) -> Self {
        RawField::Number(v)
    }
}

impl From<u64> for RawField {
    fn from(v: u64) -> Self {
        RawField::Number(v as f64)
    }
}

impl From<i64> for RawField {
    fn from(v: i64) -> Self {
        RawField::Number(v as f64)
    }
}

impl From<&str> for RawField {
    fn from(v: &str) -> Self {
        RawField::Text(v.to_string())
    }
}

impl From<String> for RawField {
    fn from(v: String) -> Self {
        RawField::Text(v)
    }
}

/// An unvalidated tick record as received from an upstream producer.
///
/// Deserializes from any flat JSON object, e.g. the exporter line format
/// `{"seq":1,"ts":1700000000000,"p":101.25,"v":3,"s":"ASK","sym":"ESZ5"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTick {
    fields: BTreeMap<String, RawField>,
}

impl RawTick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<RawField>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&RawField> {
        self.fields.get(key)
    }

    /// First present field among `aliases`, in alias order.
    pub fn first_of(&self, aliases: &[&str]) -> Option<&RawField> {
        aliases.iter().find_map(|k| self.fields.get(*k))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
