//! Kostal Bridge Framework
//!
//! The measurement distribution topology of the bridge.
//!
//! # Overview
//!
//! This framework provides:
//! - [`MeasurementObservable`], the measurement source with ordered, failure-isolated fan-out
//! - [`SinkObserver`], the per-sink subscription tracking delivery timing
//! - [`ResilientSink`] and [`Backlog`] for durable, retried delivery to a primary target
//! - the collaborator traits ([`InverterClient`], [`TimeSeriesWriter`], [`MeasurementSink`],
//!   [`StatusPublisher`])
//! - [`BridgeArgs`] for CLI argument parsing
//! - [`BridgeRunner`] for task lifecycle management
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kostal_bridge_framework::{Backlog, MeasurementObservable, ResilientSink, SinkObserver};
//!
//! let observable = Arc::new(MeasurementObservable::new(client, true));
//! let store = Arc::new(ResilientSink::new("influx", writer, Backlog::open("store/kostal.db")?));
//! Arc::new(SinkObserver::new("influx", store.clone())).subscribe(&observable);
//!
//! runner.spawn("influx", store.run());
//! runner.spawn("observable", observable.run(interval));
//! ```

mod args;
mod backlog;
mod error;
mod observable;
mod observer;
mod resilient;
mod runner;
mod sink;

pub use args::BridgeArgs;
pub use backlog::Backlog;
pub use error::{BridgeError, Result};
pub use observable::{DaylightWindow, MeasurementObservable, Observer, PublishStats};
pub use observer::SinkObserver;
pub use resilient::{DEFAULT_BATCH_SIZE, DEFAULT_RETRY_INTERVAL, ResilientSink};
pub use runner::BridgeRunner;
pub use sink::{InverterClient, MeasurementSink, StatusPublisher, TimeSeriesWriter};

// Re-export commonly used types from kostal-common
pub use kostal_common::{HealthSnapshot, LogFormat, LoggingConfig, Measurement};
