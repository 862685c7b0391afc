// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer for the `rdkafka` crate.
//!
//! A resolved [`connectivity_core::model::PublishTarget::Kafka`] address is encoded on the wire
//! as `topic` or `topic#partition_key`; the core processor's outbound pipeline has already
//! appended the outbound signal's thing-id as the key fallback before an address reaches here
//! (spec §6).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};

use connectivity_core::consumer::{Acknowledger, ConsumerEvent, RawMessage};
use connectivity_core::error::{ConnectivityError, ConnectivityErrorKind};
use connectivity_core::model::{ConnectionType, ExternalMessage, PublishTarget};
use connectivity_core::publisher::{HandleFactory, PublishHandle};
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

fn io_error(err: impl std::fmt::Display) -> ConnectivityError {
    ConnectivityError::new(ConnectivityErrorKind::TransientIo)
        .with_property("description", err.to_string())
        .deep()
}

/// Build a `rdkafka` producer from a comma-separated bootstrap server list.
///
/// # Errors
/// Returns a [`ConnectivityErrorKind::TransientIo`] error if the producer cannot be constructed.
pub fn new_producer(bootstrap_servers: &str) -> Result<FutureProducer, ConnectivityError> {
    ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers)
        .set("message.timeout.ms", "10000")
        .create()
        .map_err(io_error)
}

struct KafkaHandle {
    producer: Arc<FutureProducer>,
    topic: String,
    partition_key: Option<String>,
}

#[async_trait]
impl PublishHandle for KafkaHandle {
    async fn send(&self, message: &ExternalMessage) -> Result<(), ConnectivityError> {
        let key = self.partition_key.as_deref();
        let mut record = FutureRecord::to(&self.topic).payload(&message.payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        match self.producer.send(record, SEND_TIMEOUT).await {
            Ok(_delivery) => Ok(()),
            Err((err, _owned_message)) => Err(io_error(err)),
        }
    }
}

/// Builds one [`KafkaHandle`] per `topic#partition_key` address over a shared producer (spec
/// §1: "thin adapter over a mature client library").
pub struct KafkaFactory {
    producer: Arc<FutureProducer>,
}

impl KafkaFactory {
    /// Wrap an already-constructed producer.
    #[must_use]
    pub fn new(producer: Arc<FutureProducer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl HandleFactory for KafkaFactory {
    async fn create(&self, address: &str) -> Result<Arc<dyn PublishHandle>, ConnectivityError> {
        let PublishTarget::Kafka { topic, partition_key } =
            PublishTarget::parse(ConnectionType::Kafka, address)
        else {
            unreachable!("PublishTarget::parse(Kafka, ..) always returns Kafka")
        };
        Ok(Arc::new(KafkaHandle {
            producer: self.producer.clone(),
            topic,
            partition_key,
        }))
    }
}

struct NoopAck;

#[async_trait]
impl Acknowledger for NoopAck {
    // Kafka consumer offsets are committed by the stream driver, not per message; there is
    // nothing for the consumer worker to acknowledge back to the broker.
    async fn ack(&self) {}
}

/// Build a `rdkafka` consumer subscribed to `topics` under `group_id`.
///
/// # Errors
/// Returns a [`ConnectivityErrorKind::TransientIo`] error if the consumer cannot be constructed
/// or subscribed.
pub fn new_consumer(
    bootstrap_servers: &str,
    group_id: &str,
    topics: &[String],
) -> Result<StreamConsumer, ConnectivityError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "true")
        .create()
        .map_err(io_error)?;
    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
    consumer.subscribe(&topic_refs).map_err(io_error)?;
    Ok(consumer)
}

/// Drive `consumer`'s message stream into `events` until it errors unrecoverably (spec §4.6).
/// Auto-commit means there is nothing to acknowledge per message; every event carries a
/// [`NoopAck`].
pub async fn run_consumer(
    consumer: StreamConsumer,
    events: mpsc::Sender<(ConsumerEvent, Box<dyn Acknowledger>)>,
) {
    use futures_util::StreamExt as _;
    use rdkafka::consumer::MessageStream;

    if events
        .send((ConsumerEvent::StreamStarted, Box::new(NoopAck)))
        .await
        .is_err()
    {
        return;
    }

    let mut stream: MessageStream<'_, rdkafka::consumer::DefaultConsumerContext> = consumer.stream();
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                log::error!("Kafka consumer failed: {err}");
                break;
            }
        };

        let payload = message.payload().unwrap_or_default().to_vec();
        let mut headers = std::collections::HashMap::new();
        if let Some(header_list) = message.headers() {
            for header in header_list.iter() {
                if let Some(value) = header.value {
                    if let Ok(value) = std::str::from_utf8(value) {
                        headers.insert(header.key.to_string(), value.to_string());
                    }
                }
            }
        }

        let raw = RawMessage {
            payload,
            content_type: None,
            headers,
            address: message.topic().to_string(),
        };
        if events
            .send((ConsumerEvent::Message(raw), Box::new(NoopAck)))
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

    #[test]
    fn builds_handle_target_without_partition_key() {
        let PublishTarget::Kafka { topic, partition_key } =
            PublishTarget::parse(ConnectionType::Kafka, "telemetry")
        else {
            panic!("expected Kafka target")
        };
        assert_eq!(topic, "telemetry");
        assert_eq!(partition_key, None);
    }

    #[test]
    fn builds_handle_target_with_partition_key() {
        let PublishTarget::Kafka { topic, partition_key } =
            PublishTarget::parse(ConnectionType::Kafka, "telemetry#my:thing")
        else {
            panic!("expected Kafka target")
        };
        assert_eq!(topic, "telemetry");
        assert_eq!(partition_key, Some("my:thing".to_string()));
    }
}
