//! Kostal inverter bridge.
//!
//! Polls a Kostal inverter and distributes every measurement to InfluxDB
//! (through a durable backlog) and to an MQTT broker, while publishing a
//! small set of health keys.
//!
//! The service is assembled by [`components::Components`], which resolves
//! [`settings::Settings`] and wires the distribution topology from
//! `kostal-bridge-framework`.

pub mod components;
pub mod console;
pub mod heartbeat;
pub mod influx;
pub mod inverter;
pub mod mqtt;
pub mod settings;

pub use components::{ComponentFactory, Components, DefaultFactory, InitError, MQTT_CLIENT_ID};
pub use settings::{Environment, Secret, SettingKey, Settings, SettingsError};
