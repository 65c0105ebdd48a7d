//! Diagnostic observer that logs every measurement.

use kostal_bridge_framework::{Measurement, Observer, Result};
use tracing::info;

/// Logs each measurement at `info` level. Not durable.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl Observer for ConsoleObserver {
    fn name(&self) -> &str {
        "console"
    }

    fn on_measurement(&self, measurement: &Measurement) -> Result<()> {
        let values: Vec<String> = measurement
            .values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();

        info!(
            source = %measurement.source,
            timestamp = measurement.timestamp,
            values = %values.join(" "),
            "Measurement"
        );
        Ok(())
    }
}
