//! Measurement source with ordered fan-out to observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use kostal_common::{Measurement, current_timestamp_millis};
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::sink::InverterClient;

/// A subscriber of the measurement source.
pub trait Observer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle one measurement. Errors are logged by the source and never
    /// stop delivery to the remaining observers.
    fn on_measurement(&self, measurement: &Measurement) -> Result<()>;
}

/// Local hours during which the inverter is polled when sunset pausing is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaylightWindow {
    /// First hour of the day that is polled (inclusive).
    pub start_hour: u32,
    /// First hour of the day that is no longer polled (exclusive).
    pub end_hour: u32,
}

impl Default for DaylightWindow {
    fn default() -> Self {
        Self {
            start_hour: 5,
            end_hour: 22,
        }
    }
}

impl DaylightWindow {
    /// Check whether a local time falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let hour = time.hour();
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// Statistics from one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Observers that accepted the measurement.
    pub delivered: usize,
    /// Observers that returned an error.
    pub failed: usize,
}

impl PublishStats {
    /// Total number of observers notified.
    pub fn total(&self) -> usize {
        self.delivered + self.failed
    }
}

/// The measurement source.
///
/// Holds an ordered list of observers and pushes every measurement to each
/// of them in subscription order. Subscriptions are never removed.
pub struct MeasurementObservable {
    client: Arc<dyn InverterClient>,
    stop_during_sunset: bool,
    daylight: DaylightWindow,
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    /// Epoch millis of the last fan-out.
    last_measurement_sent_at: AtomicI64,
    measurements_sent: AtomicU64,
    delivery_errors: AtomicU64,
}

impl MeasurementObservable {
    /// Create a source polling `client`.
    pub fn new(client: Arc<dyn InverterClient>, stop_during_sunset: bool) -> Self {
        Self {
            client,
            stop_during_sunset,
            daylight: DaylightWindow::default(),
            observers: RwLock::new(Vec::new()),
            last_measurement_sent_at: AtomicI64::new(current_timestamp_millis()),
            measurements_sent: AtomicU64::new(0),
            delivery_errors: AtomicU64::new(0),
        }
    }

    /// Append an observer. Delivery order follows subscription order.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        info!(observer = %observer.name(), "Observer subscribed");
        self.observers.write().push(observer);
    }

    /// Number of subscribed observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Epoch millis of the last delivered measurement.
    pub fn last_measurement_sent_at(&self) -> i64 {
        self.last_measurement_sent_at.load(Ordering::Relaxed)
    }

    /// Measurements pushed since start.
    pub fn measurements_sent(&self) -> u64 {
        self.measurements_sent.load(Ordering::Relaxed)
    }

    /// Observer failures since start.
    pub fn delivery_errors(&self) -> u64 {
        self.delivery_errors.load(Ordering::Relaxed)
    }

    /// Push a measurement to every observer.
    pub fn publish(&self, measurement: &Measurement) -> PublishStats {
        // Deliver from a snapshot so subscribe() never waits on a slow observer
        let observers: Vec<Arc<dyn Observer>> = self.observers.read().clone();
        let mut stats = PublishStats::default();

        for observer in &observers {
            match observer.on_measurement(measurement) {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    stats.failed += 1;
                    self.delivery_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(observer = %observer.name(), error = %e, "Observer failed");
                }
            }
        }

        self.measurements_sent.fetch_add(1, Ordering::Relaxed);
        self.last_measurement_sent_at
            .store(current_timestamp_millis(), Ordering::Relaxed);

        trace!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Measurement published"
        );
        stats
    }

    /// Whether the inverter should be polled at the given local time.
    pub fn should_poll(&self, now: NaiveTime) -> bool {
        !self.stop_during_sunset || self.daylight.contains(now)
    }

    /// Read the inverter once and publish the result.
    pub async fn poll_once(&self) -> Result<PublishStats> {
        let measurement = self.client.read().await?;
        Ok(self.publish(&measurement))
    }

    /// Run the polling loop.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!(
            interval_secs = interval.as_secs(),
            stop_during_sunset = self.stop_during_sunset,
            observers = self.observer_count(),
            "Starting measurement source"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut paused = false;

        loop {
            ticker.tick().await;

            if !self.should_poll(chrono::Local::now().time()) {
                if !paused {
                    info!("Outside daylight window, polling paused");
                    paused = true;
                }
                continue;
            }
            if paused {
                info!("Daylight window reached, polling resumed");
                paused = false;
            }

            match self.poll_once().await {
                Ok(stats) => debug!(
                    delivered = stats.delivered,
                    failed = stats.failed,
                    "Poll cycle complete"
                ),
                Err(e) => warn!(error = %e, "Inverter poll failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct StaticClient;

    #[async_trait]
    impl InverterClient for StaticClient {
        async fn read(&self) -> Result<Measurement> {
            Ok(Measurement::new("test").with_value("dc/power", 1.0))
        }
    }

    struct Recording {
        name: String,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Observer for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_measurement(&self, _measurement: &Measurement) -> Result<()> {
            self.log.lock().push(self.name.clone());
            if self.fail {
                Err(BridgeError::sink(&self.name, "boom"))
            } else {
                Ok(())
            }
        }
    }

    fn recording(name: &str, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Observer> {
        Arc::new(Recording {
            name: name.to_string(),
            fail,
            log: log.clone(),
        })
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observable = MeasurementObservable::new(Arc::new(StaticClient), false);
        observable.subscribe(recording("influx", false, &log));
        observable.subscribe(recording("mqtt", false, &log));
        observable.subscribe(recording("console", false, &log));

        let stats = observable.publish(&Measurement::new("test"));

        assert_eq!(stats.delivered, 3);
        assert_eq!(*log.lock(), vec!["influx", "mqtt", "console"]);
    }

    #[test]
    fn test_failing_observer_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observable = MeasurementObservable::new(Arc::new(StaticClient), false);
        observable.subscribe(recording("first", true, &log));
        observable.subscribe(recording("second", false, &log));

        let stats = observable.publish(&Measurement::new("test"));

        assert_eq!(stats, PublishStats { delivered: 1, failed: 1 });
        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(observable.delivery_errors(), 1);
        assert_eq!(observable.measurements_sent(), 1);
    }

    #[test]
    fn test_daylight_window() {
        let window = DaylightWindow::default();
        assert!(!window.contains(NaiveTime::from_hms_opt(4, 59, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(5, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(21, 59, 59).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(22, 0, 0).unwrap()));
    }

    #[test]
    fn test_should_poll_respects_sunset_flag() {
        let midnight = NaiveTime::from_hms_opt(0, 30, 0).unwrap();

        let always = MeasurementObservable::new(Arc::new(StaticClient), false);
        assert!(always.should_poll(midnight));

        let paused = MeasurementObservable::new(Arc::new(StaticClient), true);
        assert!(!paused.should_poll(midnight));
        assert!(paused.should_poll(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_poll_once_advances_last_sent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observable = MeasurementObservable::new(Arc::new(StaticClient), false);
        observable.subscribe(recording("influx", false, &log));
        let before = observable.last_measurement_sent_at();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let stats = observable.poll_once().await.unwrap();

        assert_eq!(stats.total(), 1);
        assert!(observable.last_measurement_sent_at() > before);
    }
}
