//! Collaborator contracts consumed by the distribution topology.
//!
//! The bridge only depends on these traits. Concrete inverter, time-series
//! and message-bus clients live in the bridge crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kostal_common::Measurement;

use crate::error::Result;

/// A target a measurement can be handed to without waiting on a downstream
/// system.
///
/// Implementations must return quickly: `submit` runs on the source's push
/// loop, so anything slow belongs behind a backlog.
pub trait MeasurementSink: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Accept a measurement for delivery.
    fn submit(&self, measurement: &Measurement) -> Result<()>;
}

/// Publishes flat health keys, e.g. to a message bus.
pub trait StatusPublisher: Send + Sync {
    /// Publish every key/value pair of a status mapping.
    fn publish_status(&self, status: &BTreeMap<String, String>) -> Result<()>;
}

/// Primary time-series write target.
#[async_trait]
pub trait TimeSeriesWriter: Send + Sync {
    /// Human-readable target description (e.g. the endpoint URL).
    fn target(&self) -> &str;

    /// Write a batch of measurements. The batch is acknowledged only on `Ok`.
    async fn write(&self, batch: &[Measurement]) -> Result<()>;
}

/// Inverter polling client.
#[async_trait]
pub trait InverterClient: Send + Sync {
    /// Read one measurement from the inverter.
    async fn read(&self) -> Result<Measurement>;
}
