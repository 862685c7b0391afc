// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Traits and types for defining sets and subsets of MQTT client functionality.

use async_trait::async_trait;
use bytes::Bytes;

use crate::control_packet::{Publish, QoS};
use crate::error::{AckError, ConnectionError, DisconnectError, PublishError, SubscribeError};

// Re-export the underlying client library's event vocabulary to avoid user code taking the
// dependency directly.
// TODO: re-implement these instead of just aliasing, once there is a second transport adapter

/// Event yielded by the event loop
pub type Event = rumqttc::Event;
/// Incoming data on the event loop
pub type Incoming = rumqttc::Packet;

// ---------- Lower level MQTT abstractions ----------

/// MQTT publish, subscribe and unsubscribe functionality
#[async_trait]
pub trait MqttPubSub {
    /// MQTT Publish
    ///
    /// If connection is unavailable, publish will be queued and delivered when connection is re-established.
    /// Blocks if at capacity for queueing.
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<(), PublishError>;

    /// MQTT Subscribe
    ///
    /// If connection is unavailable, subscribe will be queued and delivered when connection is re-established.
    /// Blocks if at capacity for queueing.
    async fn subscribe(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<(), SubscribeError>;

    /// MQTT Unsubscribe
    ///
    /// If connection is unavailable, unsubscribe will be queued and delivered when connection is re-established.
    /// Blocks if at capacity for queueing.
    async fn unsubscribe(&self, topic: impl Into<String> + Send) -> Result<(), UnsubscribeError>;
}

pub use crate::error::UnsubscribeError;

/// Provides functionality for acknowledging a received Publish message (QoS 1/2)
#[async_trait]
pub trait MqttAck {
    /// Acknowledge a received Publish.
    async fn ack(&self, publish: &Publish) -> Result<(), AckError>;
}

/// MQTT disconnect functionality
#[async_trait]
pub trait MqttDisconnect {
    /// Disconnect from the MQTT broker.
    async fn disconnect(&self) -> Result<(), DisconnectError>;
}

/// Internally-facing APIs for the underlying client.
/// Use of this trait is not currently recommended except for mocking.
pub trait MqttClient: MqttPubSub + MqttAck + MqttDisconnect {}

impl<T> MqttClient for T where T: MqttPubSub + MqttAck + MqttDisconnect {}

/// MQTT Event Loop manipulation
#[async_trait]
pub trait MqttEventLoop {
    /// Poll the event loop for the next [`Event`]
    async fn poll(&mut self) -> Result<Event, ConnectionError>;

    /// Modify the clean session flag for subsequent MQTT connection attempts
    fn set_clean_session(&mut self, clean_session: bool);
}

// ---------- Higher level MQTT abstractions ----------

/// An MQTT client that has its connection state externally managed.
/// Can be used to send messages and create receivers for incoming messages.
pub trait ManagedClient: MqttPubSub {
    /// Get the client id for the MQTT connection
    fn client_id(&self) -> &str;
}

#[async_trait]
/// Receiver for incoming MQTT messages, filtered by a registered topic filter.
pub trait PubReceiver {
    /// Receives the next incoming publish.
    ///
    /// Return `None` if there will be no more incoming publishes.
    async fn recv(&mut self) -> Option<Publish>;

    /// Close the receiver, preventing further incoming publishes from being delivered to it.
    fn close(&mut self);
}
