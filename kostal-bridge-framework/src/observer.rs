//! Distribution observer connecting the measurement source to one sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use kostal_common::{Measurement, current_timestamp_millis};
use tracing::{debug, warn};

use crate::error::Result;
use crate::observable::{MeasurementObservable, Observer};
use crate::sink::MeasurementSink;

/// Subscribes a named sink to the measurement source and tracks per-path
/// delivery timing.
pub struct SinkObserver {
    name: String,
    sink: Arc<dyn MeasurementSink>,
    /// Epoch millis of the last measurement the sink accepted.
    last_processed_at: AtomicI64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl SinkObserver {
    /// Create an observer over `sink`.
    pub fn new(name: impl Into<String>, sink: Arc<dyn MeasurementSink>) -> Self {
        Self {
            name: name.into(),
            sink,
            last_processed_at: AtomicI64::new(current_timestamp_millis()),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Subscribe this observer to a source.
    pub fn subscribe(self: &Arc<Self>, observable: &MeasurementObservable) {
        observable.subscribe(self.clone());
    }

    /// Epoch millis of the last measurement processed by the sink.
    pub fn last_processed_at(&self) -> i64 {
        self.last_processed_at.load(Ordering::Relaxed)
    }

    /// Measurements the sink accepted.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Measurements the sink rejected.
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Observer for SinkObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_measurement(&self, measurement: &Measurement) -> Result<()> {
        match self.sink.submit(measurement) {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.last_processed_at
                    .store(current_timestamp_millis(), Ordering::Relaxed);
                debug!(observer = %self.name, sink = %self.sink.name(), "Measurement processed");
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(observer = %self.name, error = %e, "Sink rejected measurement");
                Err(e)
            }
        }
    }
}
