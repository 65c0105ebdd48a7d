//! InfluxDB v2 writer using the line protocol.

use std::time::Duration;

use async_trait::async_trait;
use kostal_bridge_framework::{BridgeError, Measurement, Result, TimeSeriesWriter};
use reqwest::Url;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Writes measurement batches to an InfluxDB v2 bucket.
pub struct InfluxWriter {
    client: reqwest::Client,
    endpoint: Url,
    target: String,
    token: String,
}

impl InfluxWriter {
    /// Create a writer for `bucket` in `org` on the server at `url`.
    pub fn new(url: &str, org: &str, bucket: &str, token: impl Into<String>) -> Result<Self> {
        let endpoint = write_endpoint(url, org, bucket)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::with_context("Failed to build InfluxDB HTTP client", e))?;

        Ok(Self {
            client,
            target: format!("{} ({}/{})", url, org, bucket),
            endpoint,
            token: token.into(),
        })
    }
}

#[async_trait]
impl TimeSeriesWriter for InfluxWriter {
    fn target(&self) -> &str {
        &self.target
    }

    async fn write(&self, batch: &[Measurement]) -> Result<()> {
        let lines: Vec<String> = batch.iter().filter_map(to_line_protocol).collect();
        if lines.is_empty() {
            return Ok(());
        }

        self.client
            .post(self.endpoint.clone())
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| BridgeError::write(&self.target, e.to_string()))?;

        debug!(points = lines.len(), target = %self.target, "Batch written");
        Ok(())
    }
}

/// Build the `/api/v2/write` URL with millisecond precision.
pub fn write_endpoint(url: &str, org: &str, bucket: &str) -> Result<Url> {
    let base = format!("{}/api/v2/write", url.trim_end_matches('/'));
    Url::parse_with_params(&base, [("org", org), ("bucket", bucket), ("precision", "ms")])
        .map_err(|e| BridgeError::with_context(format!("Invalid InfluxDB URL '{}'", url), e))
}

/// Render a measurement as one line-protocol point.
///
/// Non-finite values are dropped. Returns `None` when nothing is left.
pub fn to_line_protocol(measurement: &Measurement) -> Option<String> {
    let fields: Vec<String> = measurement
        .values
        .iter()
        .filter(|(_, value)| value.is_finite())
        .map(|(name, value)| format!("{}={}", escape_key(name), value))
        .collect();

    if fields.is_empty() {
        return None;
    }

    Some(format!(
        "{} {} {}",
        escape_measurement(&measurement.source),
        fields.join(","),
        measurement.timestamp
    ))
}

fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(name: &str) -> String {
    name.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
