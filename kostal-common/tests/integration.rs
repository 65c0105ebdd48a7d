//! Integration tests for kostal-common library.

use chrono::{Duration, Local};
use kostal_common::health::NOT_READY_TEXT;
use kostal_common::topic::keys;
use kostal_common::{HealthSnapshot, Measurement, health_key, measurement_topic};

#[test]
fn test_measurement_json_line_shape() {
    let m = Measurement::new("kostal")
        .at(1_703_500_000_000)
        .with_value("dc/power", 2310.5)
        .with_value("battery/soc", 87.0);

    // Backlog entries are stored one JSON document per line
    let line = m.to_json_line().unwrap();
    assert!(!line.contains('\n'));
    assert!(line.contains("\"timestamp\":1703500000000"));
    assert!(line.contains("\"dc/power\":2310.5"));

    let decoded = Measurement::from_json_line(&format!("{}\n", line)).unwrap();
    assert_eq!(decoded, m);
    assert!(Measurement::from_json_line("{ not json").is_err());
}

#[test]
fn test_snapshot_keys_match_topic_constants() {
    let now = Local::now();
    let last = (now - Duration::seconds(3)).timestamp_millis();
    let snapshot = HealthSnapshot::capture(now, last, last, 0, 0);
    let status = snapshot.status_keys();

    let expected: Vec<String> = keys::ALL.iter().map(|k| health_key(k)).collect();
    for key in &expected {
        assert!(status.contains_key(key), "missing {}", key);
    }
    assert_eq!(status.len(), expected.len());
    assert_eq!(
        status[&health_key(keys::OBSERVABLE_LAST_MEASUREMENT_SEC)],
        "3.000"
    );
}

#[test]
fn test_status_text_is_single_line() {
    let now = Local::now();
    let text = HealthSnapshot::capture(now, now.timestamp_millis(), 0, 12, 3).status_text();

    assert!(!text.contains('\n'));
    assert!(text.contains("Queue Count: 12"));
    assert!(text.contains("Error Count: 3"));
    assert_ne!(text, NOT_READY_TEXT);
}

#[test]
fn test_measurement_topics() {
    let m = Measurement::new("kostal")
        .with_value("ac/power", 2200.0)
        .with_value("home/consumption", 450.0);

    let topics: Vec<String> = m.values.keys().map(|k| measurement_topic(k)).collect();
    assert_eq!(topics, vec!["kostal/ac/power", "kostal/home/consumption"]);
}
