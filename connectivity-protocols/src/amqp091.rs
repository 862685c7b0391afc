// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer for the `lapin` crate (AMQP 0.9.1, e.g. RabbitMQ).
//!
//! A resolved [`connectivity_core::model::PublishTarget::Amqp091`] address is encoded on the
//! wire as `exchange/routing_key` (exchange empty routes via the default exchange, spec §6); one
//! `lapin::Channel` is opened per distinct address and reused for subsequent publishes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::{mpsc, Mutex};

use connectivity_core::consumer::{Acknowledger, ConsumerEvent, RawMessage};
use connectivity_core::error::{ConnectivityError, ConnectivityErrorKind};
use connectivity_core::model::{ConnectionType, ExternalMessage, PublishTarget};
use connectivity_core::publisher::{HandleFactory, PublishHandle};

fn io_error(err: impl std::fmt::Display) -> ConnectivityError {
    ConnectivityError::new(ConnectivityErrorKind::TransientIo)
        .with_property("description", err.to_string())
        .deep()
}

/// Open a connection and declare the confirm-select channel every publish/consume handle is
/// built from.
///
/// # Errors
/// Returns a [`ConnectivityErrorKind::TransientIo`] error if the broker cannot be reached.
pub async fn connect(uri: &str) -> Result<Connection, ConnectivityError> {
    Connection::connect(uri, ConnectionProperties::default())
        .await
        .map_err(io_error)
}

struct Amqp091Handle {
    channel: Channel,
    exchange: String,
    routing_key: String,
}

#[async_trait]
impl PublishHandle for Amqp091Handle {
    async fn send(&self, message: &ExternalMessage) -> Result<(), ConnectivityError> {
        let mut properties = BasicProperties::default().with_delivery_mode(2);
        if let Some(content_type) = &message.content_type {
            properties = properties.with_content_type(content_type.as_str().into());
        }
        if let Some(correlation_id) = message.headers.get("correlation-id") {
            properties = properties.with_correlation_id(correlation_id.as_str().into());
        }

        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(io_error)?;
        confirm.await.map_err(io_error)?;
        Ok(())
    }
}

/// Builds one [`Amqp091Handle`] per address over a shared connection (spec §4.7: "handle
/// creation serialized per address", spec §1: "thin adapter over a mature client library").
pub struct Amqp091Factory {
    connection: Arc<Connection>,
}

impl Amqp091Factory {
    /// Wrap an already-open connection.
    #[must_use]
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl HandleFactory for Amqp091Factory {
    async fn create(&self, address: &str) -> Result<Arc<dyn PublishHandle>, ConnectivityError> {
        let PublishTarget::Amqp091 { exchange, routing_key } =
            PublishTarget::parse(ConnectionType::Amqp091, address)
        else {
            unreachable!("PublishTarget::parse(Amqp091, ..) always returns Amqp091")
        };
        let channel = self.connection.create_channel().await.map_err(io_error)?;
        channel
            .confirm_select(lapin::options::ConfirmSelectOptions::default())
            .await
            .map_err(io_error)?;
        Ok(Arc::new(Amqp091Handle {
            channel,
            exchange,
            routing_key,
        }))
    }
}

struct DeliveryAck(Mutex<Option<lapin::message::Delivery>>);

#[async_trait]
impl Acknowledger for DeliveryAck {
    async fn ack(&self) {
        let Some(delivery) = self.0.lock().await.take() else {
            return;
        };
        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
            log::warn!("failed to ack AMQP 0.9.1 delivery: {err}");
        }
    }
}

/// Declare `queue` (if it doesn't already exist), bind it to `exchange`/`routing_key`, and drive
/// its consumer stream into `events` until the channel closes (spec §4.6). Deliveries that fail
/// to decode as UTF-8-safe bytes are still forwarded; the processor handles malformed payloads.
pub async fn run_consumer(
    channel: Channel,
    exchange: &str,
    queue: &str,
    routing_key: &str,
    consumer_tag: &str,
    events: mpsc::Sender<(ConsumerEvent, Box<dyn Acknowledger>)>,
) -> Result<(), ConnectivityError> {
    channel
        .queue_declare(
            queue,
            lapin::options::QueueDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(io_error)?;
    if !exchange.is_empty() {
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                lapin::options::QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(io_error)?;
    }

    let mut consumer = channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(io_error)?;

    if events.send((ConsumerEvent::StreamStarted, Box::new(NoopAck))).await.is_err() {
        return Ok(());
    }

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                log::error!("AMQP 0.9.1 consumer for queue '{queue}' failed: {err}");
                break;
            }
        };

        let mut headers = HashMap::new();
        if let Some(content_type) = delivery.properties.content_type() {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        if let Some(correlation_id) = delivery.properties.correlation_id() {
            headers.insert("correlation-id".to_string(), correlation_id.to_string());
        }
        if let Some(table) = delivery.properties.headers() {
            for (key, value) in table.inner() {
                if let lapin::types::AMQPValue::LongString(s) = value {
                    if let Ok(s) = std::str::from_utf8(s.as_bytes()) {
                        headers.insert(key.to_string(), s.to_string());
                    }
                }
            }
        }

        let content_type = delivery.properties.content_type().map(|s| s.to_string());
        let raw = RawMessage {
            payload: delivery.data.clone(),
            content_type,
            headers,
            address: format!("{exchange}/{}", delivery.routing_key.as_str()),
        };

        let ack = DeliveryAck(Mutex::new(Some(delivery)));
        if events
            .send((ConsumerEvent::Message(raw), Box::new(ack)))
            .await
            .is_err()
        {
            break;
        }
    }

    let _ = events.send((ConsumerEvent::StreamEnded, Box::new(NoopAck))).await;
    Ok(())
}

struct NoopAck;

#[async_trait]
impl Acknowledger for NoopAck {
    async fn ack(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_exchange_handle_target() {
        let PublishTarget::Amqp091 { exchange, routing_key } =
            PublishTarget::parse(ConnectionType::Amqp091, "my-queue")
        else {
            panic!("expected Amqp091 target")
        };
        assert_eq!(exchange, "");
        assert_eq!(routing_key, "my-queue");
    }
}
