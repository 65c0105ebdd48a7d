//! Resilient sink adapter: primary time-series writer behind a durable backlog.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kostal_common::Measurement;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::backlog::Backlog;
use crate::error::Result;
use crate::sink::{MeasurementSink, TimeSeriesWriter};

/// Default number of measurements written per request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default delay between retries while the primary target is failing.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Wraps a [`TimeSeriesWriter`] with a durable [`Backlog`].
///
/// `submit` only appends to the backlog and wakes the worker, so the
/// measurement source never waits on the primary target. The worker
/// ([`run`](Self::run)) drains the backlog in order and retries on a fixed
/// interval while the target is unreachable.
///
/// The error count tracks measurements, not requests: every submitted
/// measurement that is pending when a write fails is counted once, and
/// retries of already counted measurements add nothing.
pub struct ResilientSink {
    name: String,
    writer: Arc<dyn TimeSeriesWriter>,
    backlog: Backlog,
    batch_size: usize,
    retry_interval: Duration,
    wake: Notify,
    written: AtomicU64,
    errors: AtomicU64,
    /// Pending measurements at the backlog tail not yet counted as failed.
    uncounted: Mutex<usize>,
}

impl ResilientSink {
    /// Create an adapter over `writer` backed by `backlog`.
    pub fn new(name: impl Into<String>, writer: Arc<dyn TimeSeriesWriter>, backlog: Backlog) -> Self {
        Self {
            name: name.into(),
            writer,
            backlog,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            wake: Notify::new(),
            written: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            uncounted: Mutex::new(0),
        }
    }

    /// Set the number of measurements written per request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Measurements waiting in the backlog.
    pub fn queue_count(&self) -> usize {
        self.backlog.len()
    }

    /// Measurements that failed to reach the primary target since start.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Measurements acknowledged by the primary target since start.
    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Write the backlog head until it is empty or a write fails.
    ///
    /// A failed batch stays in the backlog. The failure adds every pending
    /// measurement not counted by an earlier failure to the error count.
    /// Returns the number of measurements acknowledged in this pass.
    pub async fn drain_once(&self) -> Result<usize> {
        let mut acknowledged = 0;

        loop {
            let batch = self.backlog.peek(self.batch_size);
            if batch.is_empty() {
                return Ok(acknowledged);
            }

            if let Err(e) = self.writer.write(&batch).await {
                let failed = std::mem::take(&mut *self.uncounted.lock());
                self.errors.fetch_add(failed as u64, Ordering::Relaxed);
                return Err(e);
            }

            self.backlog.ack(batch.len())?;
            {
                // Uncounted entries sit at the tail, so they cannot outnumber the queue
                let mut uncounted = self.uncounted.lock();
                *uncounted = (*uncounted).min(self.backlog.len());
            }
            self.written.fetch_add(batch.len() as u64, Ordering::Relaxed);
            acknowledged += batch.len();
        }
    }

    /// Run the delivery worker.
    pub async fn run(self: Arc<Self>) {
        info!(
            sink = %self.name,
            target = %self.writer.target(),
            backlog = %self.backlog.path().display(),
            pending = self.queue_count(),
            "Starting resilient sink"
        );

        loop {
            match self.drain_once().await {
                Ok(0) => {}
                Ok(count) => debug!(sink = %self.name, count, "Backlog drained"),
                Err(e) => warn!(
                    sink = %self.name,
                    error = %e,
                    pending = self.queue_count(),
                    errors = self.error_count(),
                    "Write failed, keeping backlog"
                ),
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}

impl MeasurementSink for ResilientSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, measurement: &Measurement) -> Result<()> {
        {
            let mut uncounted = self.uncounted.lock();
            self.backlog.push(measurement)?;
            *uncounted += 1;
        }
        self.wake.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FlakyWriter {
        down: AtomicBool,
        latency: Duration,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TimeSeriesWriter for FlakyWriter {
        fn target(&self) -> &str {
            "memory"
        }

        async fn write(&self, batch: &[Measurement]) -> Result<()> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(BridgeError::write("memory", "connection refused"));
            }
            self.batches.lock().push(batch.len());
            Ok(())
        }
    }

    fn sink(writer: Arc<FlakyWriter>, dir: &tempfile::TempDir) -> ResilientSink {
        let backlog = Backlog::open(dir.path().join("kostal.db")).unwrap();
        ResilientSink::new("influx", writer, backlog)
    }

    #[tokio::test]
    async fn test_drain_writes_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(FlakyWriter::default());
        let sink = sink(writer.clone(), &dir).with_batch_size(2);

        for ts in 0..5 {
            sink.submit(&Measurement::new("test").at(ts)).unwrap();
        }
        assert_eq!(sink.queue_count(), 5);

        let acknowledged = sink.drain_once().await.unwrap();

        assert_eq!(acknowledged, 5);
        assert_eq!(*writer.batches.lock(), vec![2, 2, 1]);
        assert_eq!(sink.queue_count(), 0);
        assert_eq!(sink.written_count(), 5);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(FlakyWriter::default());
        writer.down.store(true, Ordering::SeqCst);
        let sink = sink(writer.clone(), &dir);

        sink.submit(&Measurement::new("test")).unwrap();
        assert!(sink.drain_once().await.is_err());
        sink.submit(&Measurement::new("test")).unwrap();
        assert!(sink.drain_once().await.is_err());

        assert_eq!(sink.error_count(), 2);
        assert_eq!(sink.queue_count(), 2);

        writer.down.store(false, Ordering::SeqCst);
        assert_eq!(sink.drain_once().await.unwrap(), 2);
        assert_eq!(sink.queue_count(), 0);
        assert_eq!(sink.error_count(), 2);
    }

    #[tokio::test]
    async fn test_worker_drains_on_submit() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(FlakyWriter::default());
        let sink = Arc::new(sink(writer.clone(), &dir));

        let worker = tokio::spawn(sink.clone().run());
        sink.submit(&Measurement::new("test")).unwrap();

        for _ in 0..100 {
            if sink.written_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.abort();

        assert_eq!(sink.written_count(), 1);
        assert_eq!(sink.queue_count(), 0);
    }

    #[tokio::test]
    async fn test_errors_count_measurements_not_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(FlakyWriter::default());
        writer.down.store(true, Ordering::SeqCst);
        let sink = sink(writer.clone(), &dir);

        for _ in 0..3 {
            sink.submit(&Measurement::new("test")).unwrap();
        }
        assert!(sink.drain_once().await.is_err());
        assert_eq!(sink.error_count(), 3);

        // Retrying the same backlog adds nothing
        assert!(sink.drain_once().await.is_err());
        assert_eq!(sink.error_count(), 3);

        sink.submit(&Measurement::new("test")).unwrap();
        assert!(sink.drain_once().await.is_err());
        assert_eq!(sink.error_count(), 4);

        writer.down.store(false, Ordering::SeqCst);
        assert_eq!(sink.drain_once().await.unwrap(), 4);

        writer.down.store(true, Ordering::SeqCst);
        sink.submit(&Measurement::new("test")).unwrap();
        assert!(sink.drain_once().await.is_err());
        assert_eq!(sink.error_count(), 5);
    }

    #[tokio::test]
    async fn test_worker_counts_every_failed_submit() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(FlakyWriter {
            latency: Duration::from_millis(300),
            ..FlakyWriter::default()
        });
        writer.down.store(true, Ordering::SeqCst);
        let sink = Arc::new(sink(writer.clone(), &dir).with_retry_interval(Duration::from_millis(50)));

        let worker = tokio::spawn(sink.clone().run());
        for _ in 0..6 {
            sink.submit(&Measurement::new("test")).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for _ in 0..300 {
            if sink.error_count() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.error_count(), 6);

        // Timed retries of the same backlog keep failing without counting
        tokio::time::sleep(Duration::from_millis(800)).await;
        worker.abort();

        assert_eq!(sink.error_count(), 6);
        assert_eq!(sink.queue_count(), 6);
        assert_eq!(sink.written_count(), 0);
    }
}
