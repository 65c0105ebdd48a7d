//! Point-in-time health view of the bridge.
//!
//! A [`HealthSnapshot`] is derived from counters and timestamps owned by
//! other components. It is recomputed on every query and never cached.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, SecondsFormat};

use crate::topic::{health_key, keys};

/// Status line rendered when the components are not initialized.
pub const NOT_READY_TEXT: &str = "Status: Not Ready, components un-initialized";

/// Health snapshot of the measurement source and the storage path.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Local>,
    /// Seconds since the source last delivered a measurement.
    pub last_measurement_sent_secs: f64,
    /// Seconds since the storage observer last processed a measurement.
    pub last_measurement_stored_secs: f64,
    /// Measurements waiting in the storage backlog.
    pub queue_count: u64,
    /// Lifetime write errors of the storage path.
    pub error_count: u64,
}

impl HealthSnapshot {
    /// Build a snapshot from raw epoch-millisecond timestamps.
    pub fn capture(
        taken_at: DateTime<Local>,
        last_sent_millis: i64,
        last_stored_millis: i64,
        queue_count: u64,
        error_count: u64,
    ) -> Self {
        let now = taken_at.timestamp_millis();
        Self {
            taken_at,
            last_measurement_sent_secs: elapsed_secs(now, last_sent_millis),
            last_measurement_stored_secs: elapsed_secs(now, last_stored_millis),
            queue_count,
            error_count,
        }
    }

    /// Render the snapshot as a single human-readable line.
    pub fn status_text(&self) -> String {
        format!(
            "Last Event sent: {:.2} s [Measurement] Last Processed: {:.2} s [Influx] Queue Count: {} Error Count: {}",
            self.last_measurement_sent_secs,
            self.last_measurement_stored_secs,
            self.queue_count,
            self.error_count
        )
    }

    /// Render the snapshot as flat health keys under [`crate::HEALTH_ROOT`].
    pub fn status_keys(&self) -> BTreeMap<String, String> {
        let mut status = BTreeMap::new();
        status.insert(
            health_key(keys::LAST_HEART_BEAT),
            self.taken_at.to_rfc3339_opts(SecondsFormat::Micros, false),
        );
        status.insert(
            health_key(keys::OBSERVABLE_LAST_MEASUREMENT_SEC),
            format!("{:.3}", self.last_measurement_sent_secs),
        );
        status.insert(
            health_key(keys::INFLUX_LAST_MEASUREMENT_STORED_SEC),
            format!("{:.3}", self.last_measurement_stored_secs),
        );
        status.insert(
            health_key(keys::INFLUX_QUEUE_COUNT),
            self.queue_count.to_string(),
        );
        status.insert(
            health_key(keys::INFLUX_TOTAL_ERROR_COUNT),
            self.error_count.to_string(),
        );
        status
    }
}

/// Elapsed seconds between two epoch-millisecond timestamps, clamped at zero.
pub fn elapsed_secs(now_millis: i64, then_millis: i64) -> f64 {
    (now_millis - then_millis).max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> HealthSnapshot {
        let taken_at = Local.timestamp_millis_opt(1_703_500_010_000).unwrap();
        HealthSnapshot::capture(taken_at, 1_703_500_007_500, 1_703_500_000_000, 4, 2)
    }

    #[test]
    fn test_capture_computes_elapsed() {
        let snap = snapshot();
        assert_eq!(snap.last_measurement_sent_secs, 2.5);
        assert_eq!(snap.last_measurement_stored_secs, 10.0);
    }

    #[test]
    fn test_elapsed_clamped() {
        assert_eq!(elapsed_secs(1000, 5000), 0.0);
    }

    #[test]
    fn test_status_text_format() {
        let text = snapshot().status_text();
        assert_eq!(
            text,
            "Last Event sent: 2.50 s [Measurement] Last Processed: 10.00 s [Influx] Queue Count: 4 Error Count: 2"
        );
    }

    #[test]
    fn test_status_keys() {
        let keys = snapshot().status_keys();

        assert_eq!(keys.len(), 5);
        assert_eq!(
            keys["health/kostalservice/observable/lastMeasurementSec"],
            "2.500"
        );
        assert_eq!(
            keys["health/kostalservice/influx/lastMeasurementStoredSec"],
            "10.000"
        );
        assert_eq!(keys["health/kostalservice/influx/queueCount"], "4");
        assert_eq!(keys["health/kostalservice/influx/totalErrorCount"], "2");

        let heartbeat = &keys["health/kostalservice/lastHeartBeat"];
        assert!(DateTime::parse_from_rfc3339(heartbeat).is_ok());
    }
}
