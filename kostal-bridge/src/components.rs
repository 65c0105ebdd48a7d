//! Composition root of the bridge.
//!
//! [`Components`] resolves the settings, builds the measurement source and
//! wires two independent delivery paths onto it:
//!
//! - storage: InfluxDB writer behind a [`ResilientSink`] with a durable backlog
//! - message bus: MQTT publisher
//!
//! It also renders the health snapshot. Status queries only read atomics
//! and never fail; before initialization they report "not ready".

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use kostal_bridge_framework::{
    Backlog, BridgeError, BridgeRunner, HealthSnapshot, InverterClient, MeasurementObservable,
    MeasurementSink, ResilientSink, SinkObserver, StatusPublisher, TimeSeriesWriter,
};
use kostal_common::health::NOT_READY_TEXT;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::console::ConsoleObserver;
use crate::influx::InfluxWriter;
use crate::inverter::HttpInverterClient;
use crate::mqtt::{MqttConnection, MqttPublisher};
use crate::settings::{Environment, Settings, SettingsError};

/// Client identity used on the MQTT broker.
pub const MQTT_CLIENT_ID: &str = "ha.kostal.service";

const STORAGE_PATH: &str = "influx";
const BUS_PATH: &str = "mqtt";

/// Initialization failures.
#[derive(Debug, Error)]
pub enum InitError {
    /// Settings could not be resolved.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A component could not be constructed.
    #[error("Failed to construct components: {0}")]
    Bridge(#[from] BridgeError),
}

/// Message-bus endpoints handed out by a [`ComponentFactory`].
pub struct MessageBus {
    /// Target for measurement values.
    pub sink: Arc<dyn MeasurementSink>,
    /// Target for health keys.
    pub status: Arc<dyn StatusPublisher>,
    /// Network driver, if the bus needs one.
    pub connection: Option<MqttConnection>,
}

/// Builds the external collaborators from resolved settings.
pub trait ComponentFactory {
    fn inverter_client(&self, settings: &Settings) -> Result<Arc<dyn InverterClient>, BridgeError>;

    fn time_series_writer(
        &self,
        settings: &Settings,
    ) -> Result<Arc<dyn TimeSeriesWriter>, BridgeError>;

    fn message_bus(&self, settings: &Settings, client_id: &str) -> Result<MessageBus, BridgeError>;
}

/// Production collaborators: HTTP inverter client, InfluxDB writer, MQTT.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFactory;

impl ComponentFactory for DefaultFactory {
    fn inverter_client(&self, settings: &Settings) -> Result<Arc<dyn InverterClient>, BridgeError> {
        let client = HttpInverterClient::new(
            &settings.kostal_url,
            &settings.kostal_user,
            &settings.kostal_password,
        )?;
        Ok(Arc::new(client))
    }

    fn time_series_writer(
        &self,
        settings: &Settings,
    ) -> Result<Arc<dyn TimeSeriesWriter>, BridgeError> {
        let writer = InfluxWriter::new(
            &settings.influx_url,
            &settings.influx_org,
            &settings.influx_bucket,
            &settings.influx_token,
        )?;
        Ok(Arc::new(writer))
    }

    fn message_bus(&self, settings: &Settings, client_id: &str) -> Result<MessageBus, BridgeError> {
        let (publisher, connection) =
            MqttPublisher::new(&settings.mqtt_host, settings.mqtt_port, client_id);
        let publisher = Arc::new(publisher);

        Ok(MessageBus {
            sink: publisher.clone(),
            status: publisher,
            connection: Some(connection),
        })
    }
}

/// Owns every component of the running bridge.
#[derive(Default)]
pub struct Components {
    observable: Option<Arc<MeasurementObservable>>,
    store: Option<Arc<ResilientSink>>,
    store_observer: Option<Arc<SinkObserver>>,
    bus_observer: Option<Arc<SinkObserver>>,
    status_publisher: Option<Arc<dyn StatusPublisher>>,
    /// Taken by [`start`](Self::start).
    connection: Mutex<Option<MqttConnection>>,
    console_enabled: bool,
}

impl Components {
    /// Create an uninitialized set of components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve settings for `work_dir` and build the production topology.
    pub fn init(&mut self, work_dir: impl AsRef<Path>) -> Result<(), InitError> {
        self.init_with(work_dir, &Environment::from_process(), &DefaultFactory)
    }

    /// Resolve settings from `env` and build the topology with `factory`.
    ///
    /// Nothing is stored on `self` unless every step succeeds.
    pub fn init_with(
        &mut self,
        work_dir: impl AsRef<Path>,
        env: &Environment,
        factory: &dyn ComponentFactory,
    ) -> Result<(), InitError> {
        let settings = Settings::resolve_with(work_dir, env)?;

        let client = factory.inverter_client(&settings)?;
        let observable = Arc::new(MeasurementObservable::new(
            client,
            settings.kostal_stop_during_sunset,
        ));

        let writer = factory.time_series_writer(&settings)?;
        let backlog = Backlog::open(settings.measurement_store_file_path.clone())?;
        let store = Arc::new(ResilientSink::new(STORAGE_PATH, writer, backlog));
        let store_observer = Arc::new(SinkObserver::new(STORAGE_PATH, store.clone()));
        store_observer.subscribe(&observable);

        let bus = factory.message_bus(&settings, MQTT_CLIENT_ID)?;
        let bus_observer = Arc::new(SinkObserver::new(BUS_PATH, bus.sink));
        bus_observer.subscribe(&observable);

        info!(
            observers = observable.observer_count(),
            pending = store.queue_count(),
            "Components initialized"
        );

        self.observable = Some(observable);
        self.store = Some(store);
        self.store_observer = Some(store_observer);
        self.bus_observer = Some(bus_observer);
        self.status_publisher = Some(bus.status);
        self.connection = Mutex::new(bus.connection);
        self.console_enabled = false;
        Ok(())
    }

    /// Attach the console observer to the measurement source.
    ///
    /// Returns false if the source does not exist yet or the console is
    /// already attached.
    pub fn enable_console_observer(&mut self) -> bool {
        let Some(observable) = &self.observable else {
            return false;
        };
        if self.console_enabled {
            return false;
        }

        observable.subscribe(Arc::new(ConsoleObserver));
        self.console_enabled = true;
        true
    }

    /// Whether the source, the storage sink and its observer all exist.
    pub fn is_ready(&self) -> bool {
        self.observable.is_some() && self.store.is_some() && self.store_observer.is_some()
    }

    /// Take a health snapshot, or `None` when not ready.
    pub fn snapshot(&self) -> Option<HealthSnapshot> {
        let observable = self.observable.as_ref()?;
        let store = self.store.as_ref()?;
        let store_observer = self.store_observer.as_ref()?;

        Some(HealthSnapshot::capture(
            Local::now(),
            observable.last_measurement_sent_at(),
            store_observer.last_processed_at(),
            store.queue_count() as u64,
            store.error_count(),
        ))
    }

    /// Single-line status.
    pub fn status_text(&self) -> String {
        self.snapshot()
            .map(|snapshot| snapshot.status_text())
            .unwrap_or_else(|| NOT_READY_TEXT.to_string())
    }

    /// Flat health keys; empty when not ready.
    pub fn status_keys(&self) -> BTreeMap<String, String> {
        self.snapshot()
            .map(|snapshot| snapshot.status_keys())
            .unwrap_or_default()
    }

    /// Start the storage worker, the MQTT connection and the poll loop.
    pub fn start(
        &self,
        runner: &mut BridgeRunner,
        poll_interval: Duration,
    ) -> Result<(), InitError> {
        let (Some(observable), Some(store)) = (&self.observable, &self.store) else {
            return Err(BridgeError::worker("components are not initialized").into());
        };

        runner.spawn(STORAGE_PATH, store.clone().run());
        if let Some(connection) = self.connection.lock().take() {
            runner.spawn(BUS_PATH, connection.run());
        }
        runner.spawn("observable", observable.clone().run(poll_interval));
        Ok(())
    }

    pub fn observable(&self) -> Option<&Arc<MeasurementObservable>> {
        self.observable.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<ResilientSink>> {
        self.store.as_ref()
    }

    pub fn store_observer(&self) -> Option<&Arc<SinkObserver>> {
        self.store_observer.as_ref()
    }

    pub fn bus_observer(&self) -> Option<&Arc<SinkObserver>> {
        self.bus_observer.as_ref()
    }

    pub fn status_publisher(&self) -> Option<&Arc<dyn StatusPublisher>> {
        self.status_publisher.as_ref()
    }
}
