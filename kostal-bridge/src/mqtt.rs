//! MQTT publisher for measurement values and health keys.

use std::collections::BTreeMap;
use std::time::Duration;

use kostal_bridge_framework::{BridgeError, Measurement, MeasurementSink, Result, StatusPublisher};
use kostal_common::measurement_topic;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{debug, info, trace, warn};

/// Requests buffered by the client while the broker is unreachable.
pub const DEFAULT_REQUEST_CAPACITY: usize = 1000;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Publishes to an MQTT broker without waiting for the network.
///
/// Every publish is queued on the client's request channel; the paired
/// [`MqttConnection`] drives the network side.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    broker: String,
}

/// Network half of an [`MqttPublisher`].
pub struct MqttConnection {
    event_loop: EventLoop,
    broker: String,
}

impl MqttPublisher {
    /// Create a publisher for `host:port` identified as `client_id`.
    pub fn new(host: &str, port: u16, client_id: &str) -> (Self, MqttConnection) {
        Self::with_capacity(host, port, client_id, DEFAULT_REQUEST_CAPACITY)
    }

    /// Create a publisher with an explicit request queue capacity.
    pub fn with_capacity(
        host: &str,
        port: u16,
        client_id: &str,
        capacity: usize,
    ) -> (Self, MqttConnection) {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, event_loop) = AsyncClient::new(options, capacity);
        let broker = format!("{}:{}", host, port);

        (
            Self {
                client,
                broker: broker.clone(),
            },
            MqttConnection { event_loop, broker },
        )
    }

    /// Broker address.
    pub fn broker(&self) -> &str {
        &self.broker
    }

    fn enqueue(&self, topic: String, qos: QoS, retain: bool, payload: String) -> Result<()> {
        self.client
            .try_publish(topic.clone(), qos, retain, payload)
            .map_err(|e| BridgeError::Publish {
                topic,
                message: e.to_string(),
            })
    }
}

impl MeasurementSink for MqttPublisher {
    fn name(&self) -> &str {
        "mqtt"
    }

    /// Queue one message per value. All values are attempted; the first
    /// failure is returned.
    fn submit(&self, measurement: &Measurement) -> Result<()> {
        let mut first_error = None;

        for (name, value) in &measurement.values {
            let result = self.enqueue(
                measurement_topic(name),
                QoS::AtMostOnce,
                false,
                value.to_string(),
            );
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl StatusPublisher for MqttPublisher {
    fn publish_status(&self, status: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in status {
            self.enqueue(key.clone(), QoS::AtLeastOnce, true, value.clone())?;
        }
        debug!(keys = status.len(), "Health keys queued");
        Ok(())
    }
}

impl MqttConnection {
    /// Drive the connection forever, reconnecting after errors.
    pub async fn run(mut self) {
        info!(broker = %self.broker, "Starting MQTT connection");

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!(broker = %self.broker, "Connected to MQTT broker");
                    } else {
                        warn!(broker = %self.broker, code = ?ack.code, "MQTT connection refused");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!(broker = %self.broker, "Disconnected by broker");
                }
                Ok(event) => trace!(?event, "MQTT event"),
                Err(e) => {
                    warn!(
                        broker = %self.broker,
                        error = %e,
                        retry_secs = RECONNECT_DELAY.as_secs(),
                        "MQTT connection error, reconnecting"
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kostal_common::{HEALTH_ROOT, health_key, topic::keys};

    #[test]
    fn test_submit_queues_values() {
        let (publisher, _connection) = MqttPublisher::with_capacity("localhost", 1883, "test", 4);
        let m = Measurement::new("kostal")
            .with_value("dc/power", 1.0)
            .with_value("ac/power", 2.0);

        assert!(publisher.submit(&m).is_ok());
        assert_eq!(publisher.broker(), "localhost:1883");
    }

    #[test]
    fn test_full_queue_reports_topic() {
        let (publisher, _connection) = MqttPublisher::with_capacity("localhost", 1883, "test", 1);
        let m = Measurement::new("kostal")
            .with_value("a", 1.0)
            .with_value("b", 2.0);

        match publisher.submit(&m) {
            Err(BridgeError::Publish { topic, .. }) => assert_eq!(topic, "kostal/b"),
            other => panic!("expected publish error, got {:?}", other),
        }
    }

    #[test]
    fn test_publish_status_stops_on_full_queue() {
        let (publisher, _connection) = MqttPublisher::with_capacity("localhost", 1883, "test", 1);
        let mut status = BTreeMap::new();
        status.insert(health_key(keys::INFLUX_QUEUE_COUNT), "0".to_string());
        status.insert(health_key(keys::INFLUX_TOTAL_ERROR_COUNT), "0".to_string());

        let err = publisher.publish_status(&status).unwrap_err();
        assert!(err.to_string().contains(HEALTH_ROOT));
    }
}
