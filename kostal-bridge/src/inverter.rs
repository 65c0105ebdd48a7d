//! HTTP client for the Kostal inverter.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use kostal_bridge_framework::{BridgeError, InverterClient, Measurement, Result};
use serde_json::Value;
use tracing::trace;

/// Source name attached to every inverter measurement.
pub const SOURCE: &str = "kostal";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads the inverter's JSON status document over HTTP.
pub struct HttpInverterClient {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl HttpInverterClient {
    /// Create a client for `url` using basic credentials.
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::with_context("Failed to build inverter HTTP client", e))?;

        Ok(Self {
            client,
            url: url.into(),
            user: user.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl InverterClient for HttpInverterClient {
    async fn read(&self) -> Result<Measurement> {
        let document: Value = self
            .client
            .get(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| BridgeError::Inverter(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| BridgeError::Inverter(e.to_string()))?;

        let measurement = measurement_from_document(&document)?;
        trace!(values = measurement.values.len(), "Inverter read");
        Ok(measurement)
    }
}

/// Build a measurement from the numeric leaves of a JSON document.
pub fn measurement_from_document(document: &Value) -> Result<Measurement> {
    let mut measurement = Measurement::new(SOURCE);
    flatten_values("", document, &mut measurement.values);

    if measurement.is_empty() {
        return Err(BridgeError::Inverter(
            "response contained no numeric values".to_string(),
        ));
    }
    Ok(measurement)
}

/// Collect numeric leaves of `value` into `out`, joining nested keys with `/`.
///
/// Booleans map to `0`/`1`; strings and nulls are ignored. Array elements
/// are keyed by their index.
pub fn flatten_values(prefix: &str, value: &Value, out: &mut BTreeMap<String, f64>) {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64().filter(|v| v.is_finite()) {
                out.insert(prefix.to_string(), v);
            }
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), if *b { 1.0 } else { 0.0 });
        }
        Value::Object(map) => {
            for (key, child) in map {
                flatten_values(&join(prefix, key), child, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_values(&join(prefix, &index.to_string()), child, out);
            }
        }
        Value::String(_) | Value::Null => {}
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_document() {
        let document = json!({
            "dc": { "power": 2310.5, "strings": [410.0, 395.5] },
            "ac": { "power": 2200, "online": true },
            "serial": "90331ABC",
            "fault": null
        });

        let mut values = BTreeMap::new();
        flatten_values("", &document, &mut values);

        assert_eq!(values.get("dc/power"), Some(&2310.5));
        assert_eq!(values.get("dc/strings/1"), Some(&395.5));
        assert_eq!(values.get("ac/power"), Some(&2200.0));
        assert_eq!(values.get("ac/online"), Some(&1.0));
        assert!(!values.contains_key("serial"));
        assert!(!values.contains_key("fault"));
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn test_scalar_document_uses_empty_name() {
        let mut values = BTreeMap::new();
        flatten_values("", &json!(42), &mut values);
        assert_eq!(values.get(""), Some(&42.0));
    }

    #[test]
    fn test_document_without_numbers_rejected() {
        let err = measurement_from_document(&json!({ "state": "standby" })).unwrap_err();
        assert!(matches!(err, BridgeError::Inverter(_)));
    }

    #[test]
    fn test_measurement_source() {
        let m = measurement_from_document(&json!({ "yield": { "today": 12.4 } })).unwrap();
        assert_eq!(m.source, SOURCE);
        assert_eq!(m.values.get("yield/today"), Some(&12.4));
    }
}
