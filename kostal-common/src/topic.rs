//! Message-bus topic and health key builders.

/// Topic prefix for published measurement values.
pub const MEASUREMENT_PREFIX: &str = "kostal";

/// Namespace for all health keys.
pub const HEALTH_ROOT: &str = "health/kostalservice/";

/// Health key suffixes, relative to [`HEALTH_ROOT`].
pub mod keys {
    pub const LAST_HEART_BEAT: &str = "lastHeartBeat";
    pub const OBSERVABLE_LAST_MEASUREMENT_SEC: &str = "observable/lastMeasurementSec";
    pub const INFLUX_LAST_MEASUREMENT_STORED_SEC: &str = "influx/lastMeasurementStoredSec";
    pub const INFLUX_QUEUE_COUNT: &str = "influx/queueCount";
    pub const INFLUX_TOTAL_ERROR_COUNT: &str = "influx/totalErrorCount";

    /// All health key suffixes in publication order.
    pub const ALL: [&str; 5] = [
        LAST_HEART_BEAT,
        OBSERVABLE_LAST_MEASUREMENT_SEC,
        INFLUX_LAST_MEASUREMENT_STORED_SEC,
        INFLUX_QUEUE_COUNT,
        INFLUX_TOTAL_ERROR_COUNT,
    ];
}

/// Build a full health key from a suffix.
///
/// # Example
/// ```
/// use kostal_common::topic::{health_key, keys};
///
/// assert_eq!(
///     health_key(keys::INFLUX_QUEUE_COUNT),
///     "health/kostalservice/influx/queueCount"
/// );
/// ```
pub fn health_key(suffix: &str) -> String {
    format!("{}{}", HEALTH_ROOT, suffix)
}

/// Build the topic a measurement value is published on.
///
/// MQTT wildcard characters in the value name are replaced with `_`.
///
/// # Example
/// ```
/// use kostal_common::topic::measurement_topic;
///
/// assert_eq!(measurement_topic("dc/power"), "kostal/dc/power");
/// ```
pub fn measurement_topic(name: &str) -> String {
    let sanitized: String = name
        .trim_matches('/')
        .chars()
        .map(|c| match c {
            '+' | '#' | '\0' => '_',
            c => c,
        })
        .collect();
    format!("{}/{}", MEASUREMENT_PREFIX, sanitized)
}
