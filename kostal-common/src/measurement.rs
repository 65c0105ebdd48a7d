use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// A single timestamped reading taken from the inverter.
///
/// The bridge core never interprets the values; only the sinks do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Unix epoch milliseconds when the measurement was taken.
    pub timestamp: i64,

    /// Device identifier (e.g., "kostal", "192.168.111.4").
    pub source: String,

    /// Named numeric values (e.g., "dc/power" -> 2310.5).
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl Measurement {
    /// Create an empty measurement with the current timestamp.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source: source.into(),
            values: BTreeMap::new(),
        }
    }

    /// Add a value to this measurement.
    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true if the measurement carries no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode as a single-line JSON document, without the trailing newline.
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one JSON line as written by [`to_json_line`](Self::to_json_line).
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
