// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer wiring `connectivity-mqtt`'s supervised connection into the publisher/consumer
//! traits (spec §3 `ConnectionType::Mqtt`, §4.8).
//!
//! A resolved [`connectivity_core::model::PublishTarget::MqttTopic`] address is encoded on the
//! wire as `topic` or `topic#qos`; MQTT topic names cannot contain a literal `#`
//! (`connectivity_mqtt::topic::TopicParseError::WildcardInTopicName`), so the delimiter never
//! collides with a topic segment, just as it doesn't for Kafka's partition key.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use connectivity_mqtt::control_packet::{Publish as MqttPublish, QoS};
use connectivity_mqtt::interface::{MqttAck, MqttPubSub};
use connectivity_mqtt::session::connection::MqttConnection;
use connectivity_mqtt::session::reconnect_policy::ExponentialBackoffWithJitter;
use connectivity_mqtt::session::ConnectionError;
use connectivity_mqtt::topic::TopicFilter;
use connectivity_mqtt::{new_client, ClientAlias, EventLoopAlias, MqttConnectionSettings};

use connectivity_core::consumer::{Acknowledger, ConsumerEvent, RawMessage};
use connectivity_core::error::{ConnectivityError, ConnectivityErrorKind};
use connectivity_core::model::{ConnectionType, ExternalMessage, PublishTarget};
use connectivity_core::publisher::{HandleFactory, PublishHandle};

const EVENT_CHANNEL_CAPACITY: usize = 64;

fn io_error(err: impl std::fmt::Display) -> ConnectivityError {
    ConnectivityError::new(ConnectivityErrorKind::TransientIo)
        .with_property("description", err.to_string())
        .deep()
}

/// Build the client/connection-supervisor pair for one connection's MQTT transport (spec §3:
/// "a connection is restricted to a single underlying MQTT client"). Call [`subscribe`] for every
/// source against the returned [`MqttConnection`] before handing it to [`spawn_connection`] --
/// once the loop is spawned the connection is moved and can no longer be registered against.
///
/// # Errors
/// Returns a [`ConnectivityErrorKind::TransientIo`] error if the client/event loop cannot be
/// constructed (e.g. unreadable TLS material).
pub fn new_connection(
    settings: &MqttConnectionSettings,
) -> Result<(ClientAlias, MqttConnection<ClientAlias, EventLoopAlias>), ConnectivityError> {
    let (client, event_loop) = new_client(settings, EVENT_CHANNEL_CAPACITY).map_err(io_error)?;
    let connection = MqttConnection::new(
        client.clone(),
        event_loop,
        Box::new(ExponentialBackoffWithJitter::default()),
    );
    Ok((client, connection))
}

/// Spawn `connection`'s connect/reconnect loop in the background (spec §4.8). Connectivity is
/// observed through the connection's own exit handle/monitor; this task's join result is only
/// logged.
pub fn spawn_connection(
    mut connection: MqttConnection<ClientAlias, EventLoopAlias>,
) -> JoinHandle<Result<(), ConnectionError>> {
    tokio::spawn(async move {
        let result = connection.run().await;
        if let Err(ref err) = result {
            log::error!("MQTT connection loop ended: {err}");
        }
        result
    })
}

struct MqttHandle {
    client: ClientAlias,
    topic: String,
    qos: QoS,
}

#[async_trait]
impl PublishHandle for MqttHandle {
    async fn send(&self, message: &ExternalMessage) -> Result<(), ConnectivityError> {
        // `AsyncClient` has an inherent `publish` over `rumqttc::QoS`; go through the trait
        // explicitly so this stays on the protocol-neutral `QoS`.
        MqttPubSub::publish(
            &self.client,
            self.topic.clone(),
            self.qos,
            false,
            message.payload.clone(),
        )
        .await
        .map_err(io_error)
    }
}

#[cfg(test)]
impl MqttHandle {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn qos(&self) -> QoS {
        self.qos
    }
}

/// Builds one [`MqttHandle`] per `topic#qos` address over a shared client (spec §1: "thin
/// adapter over a mature client library").
pub struct MqttFactory {
    client: ClientAlias,
}

impl MqttFactory {
    /// Wrap an already-constructed client.
    #[must_use]
    pub fn new(client: ClientAlias) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HandleFactory for MqttFactory {
    async fn create(&self, address: &str) -> Result<Arc<dyn PublishHandle>, ConnectivityError> {
        let PublishTarget::MqttTopic { topic, qos } =
            PublishTarget::parse(ConnectionType::Mqtt, address)
        else {
            unreachable!("PublishTarget::parse(Mqtt, ..) always returns MqttTopic")
        };
        let qos = QoS::from_value(qos).unwrap_or(QoS::AtMostOnce);
        Ok(Arc::new(MqttHandle {
            client: self.client.clone(),
            topic,
            qos,
        }))
    }
}

struct NoopAck;

#[async_trait]
impl Acknowledger for NoopAck {
    async fn ack(&self) {}
}

/// Acknowledges a received QoS 1/2 publish back to the broker; a no-op for QoS 0, which has no
/// acknowledgement packet (MQTT 3.1.1 §4.3).
struct PublishAck {
    client: ClientAlias,
    publish: MqttPublish,
}

#[async_trait]
impl Acknowledger for PublishAck {
    async fn ack(&self) {
        if self.publish.qos == QoS::AtMostOnce {
            return;
        }
        if let Err(err) = MqttAck::ack(&self.client, &self.publish).await {
            log::warn!("failed to ack MQTT publish on '{}': {err}", self.publish.topic);
        }
    }
}

/// Parse a source address into the [`TopicFilter`] [`MqttConnection::register_filter`] expects.
///
/// # Errors
/// Returns a [`ConnectivityErrorKind::ConnectionConfigurationInvalid`] error if `address` is not
/// a valid MQTT topic filter.
pub fn subscribe_filter(address: &str) -> Result<TopicFilter, ConnectivityError> {
    TopicFilter::from_string(address.to_string()).map_err(|err| {
        ConnectivityError::new(ConnectivityErrorKind::ConnectionConfigurationInvalid)
            .with_property("description", err.to_string())
    })
}

/// Register a source's topic filter against `connection`'s incoming-publish dispatcher, and issue
/// the matching broker-level SUBSCRIBE at `qos` (spec §4.6). Must be called before
/// [`spawn_connection`] moves `connection` into its run loop; the returned receiver is what
/// [`run_consumer`] should be started on.
///
/// # Errors
/// Returns a [`ConnectivityErrorKind::ConnectionConfigurationInvalid`] error if `address` is not
/// a valid MQTT topic filter, or a [`ConnectivityErrorKind::TransientIo`] error if the SUBSCRIBE
/// request cannot be queued.
pub async fn subscribe(
    client: &ClientAlias,
    connection: &MqttConnection<ClientAlias, EventLoopAlias>,
    address: &str,
    qos: u8,
) -> Result<mpsc::Receiver<MqttPublish>, ConnectivityError> {
    let filter = subscribe_filter(address)?;
    let receiver = connection.register_filter(filter);
    let qos = QoS::from_value(qos).unwrap_or(QoS::AtMostOnce);
    MqttPubSub::subscribe(client, address.to_string(), qos)
        .await
        .map_err(io_error)?;
    Ok(receiver)
}

/// Drive one source's registered-filter receiver into `events` until the connection's dispatcher
/// drops it (spec §4.6). Every message carries a [`PublishAck`]; QoS 0 messages ack as a no-op.
pub async fn run_consumer(
    client: ClientAlias,
    mut receiver: mpsc::Receiver<MqttPublish>,
    events: mpsc::Sender<(ConsumerEvent, Box<dyn Acknowledger>)>,
) {
    if events
        .send((ConsumerEvent::StreamStarted, Box::new(NoopAck)))
        .await
        .is_err()
    {
        return;
    }

    while let Some(publish) = receiver.recv().await {
        let raw = RawMessage {
            payload: publish.payload.to_vec(),
            content_type: None,
            headers: std::collections::HashMap::new(),
            address: publish.topic.clone(),
        };
        let ack = PublishAck {
            client: client.clone(),
            publish,
        };
        if events
            .send((ConsumerEvent::Message(raw), Box::new(ack)))
            .await
            .is_err()
        {
            break;
        }
    }

    let _ = events.send((ConsumerEvent::StreamEnded, Box::new(NoopAck))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttConnectionSettings {
        connectivity_mqtt::MqttConnectionSettingsBuilder::default()
            .client_id("test-client")
            .hostname("localhost")
            .use_tls(false)
            .build()
            .unwrap()
    }

    #[test]
    fn new_connection_builds_client_and_supervisor() {
        let (_client, _connection) = new_connection(&settings()).unwrap();
    }

    #[tokio::test]
    async fn factory_builds_handle_with_encoded_qos() {
        let (client, _connection) = new_connection(&settings()).unwrap();
        let factory = MqttFactory::new(client);

        // reaches the `HandleFactory` trait object path; a panic here would mean the address
        // failed to parse as an `MqttTopic` target.
        let _handle = factory.create("my/thing/telemetry#1").await.unwrap();
    }

    #[test]
    fn factory_defaults_out_of_range_qos_to_at_most_once() {
        let (client, _connection) = new_connection(&settings()).unwrap();

        let PublishTarget::MqttTopic { topic, qos } =
            PublishTarget::parse(ConnectionType::Mqtt, "my/thing/telemetry#9")
        else {
            panic!("expected MqttTopic target")
        };
        let handle = MqttHandle {
            client,
            topic,
            qos: QoS::from_value(qos).unwrap_or(QoS::AtMostOnce),
        };
        assert_eq!(handle.topic(), "my/thing/telemetry");
        assert_eq!(handle.qos(), QoS::AtMostOnce);
    }

    #[test]
    fn subscribe_filter_parses_valid_topic_filter() {
        let filter = subscribe_filter("my/thing/+/telemetry").unwrap();
        assert_eq!(filter.to_string(), "my/thing/+/telemetry");
    }

    #[test]
    fn subscribe_filter_rejects_invalid_filter() {
        assert!(subscribe_filter("my/#/telemetry").is_err());
    }

    #[tokio::test]
    async fn subscribe_registers_dispatcher_and_queues_broker_subscribe() {
        let (client, connection) = new_connection(&settings()).unwrap();
        // exercises the dispatcher registration (`connectivity_mqtt::session::dispatch`) and
        // queues a SUBSCRIBE over the (unconnected, in this test) client.
        let _receiver = subscribe(&client, &connection, "my/thing/+/telemetry", 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscribe_rejects_invalid_filter_without_registering() {
        let (client, connection) = new_connection(&settings()).unwrap();
        assert!(subscribe(&client, &connection, "my/#/telemetry", 0).await.is_err());
    }
}
