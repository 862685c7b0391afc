// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer for the `fe2o3-amqp` crate (AMQP 1.0).
//!
//! A resolved address's `queue://`/`topic://`/bare prefix (spec §6) is parsed into
//! [`Amqp10Address`] and stripped before attaching the sender link; the prefix itself carries no
//! further meaning to `fe2o3-amqp`, which addresses both node kinds identically.

use std::sync::Arc;

use async_trait::async_trait;
use fe2o3_amqp::link::delivery::Delivery;
use fe2o3_amqp::link::{RecvError, SendError};
use fe2o3_amqp::{Receiver, Sender, Session};
use fe2o3_amqp_types::messaging::{Accepted, Body, Message, Outcome, Properties};
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

/// An address disambiguated by its `queue://`/`topic://` prefix (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Amqp10Address {
    /// `queue://<name>`
    Queue(String),
    /// `topic://<name>`
    Topic(String),
    /// No recognized prefix; used verbatim.
    Bare(String),
}

impl Amqp10Address {
    /// The link target/source address `fe2o3-amqp` attaches to, prefix stripped.
    #[must_use]
    pub fn node_address(&self) -> &str {
        match self {
            Amqp10Address::Queue(address)
            | Amqp10Address::Topic(address)
            | Amqp10Address::Bare(address) => address,
        }
    }
}

/// Parse a resolved AMQP 1.0 target address (spec §6).
#[must_use]
pub fn parse_address(address: &str) -> Amqp10Address {
    if let Some(rest) = address.strip_prefix("queue://") {
        Amqp10Address::Queue(rest.to_string())
    } else if let Some(rest) = address.strip_prefix("topic://") {
        Amqp10Address::Topic(rest.to_string())
    } else {
        Amqp10Address::Bare(address.to_string())
    }
}

struct Amqp10Handle {
    sender: Mutex<Sender>,
}

#[async_trait]
impl PublishHandle for Amqp10Handle {
    async fn send(&self, message: &ExternalMessage) -> Result<(), ConnectivityError> {
        let mut builder = Message::builder().data(message.payload.clone());
        if let Some(content_type) = &message.content_type {
            builder = builder.properties(Properties::builder().content_type(content_type.as_str()).build());
        }
        let mut sender = self.sender.lock().await;
        let outcome = sender.send(builder.build()).await.map_err(send_error)?;
        match outcome {
            Outcome::Accepted(Accepted {}) => Ok(()),
            other => Err(io_error(format!("message not accepted: {other:?}"))),
        }
    }
}

fn send_error(err: SendError) -> ConnectivityError {
    io_error(err)
}

/// Builds one [`Amqp10Handle`] per address over a shared session (spec §1: "thin adapter over a
/// mature client library").
pub struct Amqp10Factory {
    session: Arc<Mutex<Session>>,
}

impl Amqp10Factory {
    /// Wrap an already-open session.
    #[must_use]
    pub fn new(session: Arc<Mutex<Session>>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HandleFactory for Amqp10Factory {
    async fn create(&self, address: &str) -> Result<Arc<dyn PublishHandle>, ConnectivityError> {
        let PublishTarget::Amqp10Address(address) = PublishTarget::parse(ConnectionType::Amqp10, address)
        else {
            unreachable!("PublishTarget::parse(Amqp10, ..) always returns Amqp10Address")
        };
        let node_address = parse_address(&address).node_address().to_string();
        let mut session = self.session.lock().await;
        let sender = Sender::attach(&mut session, format!("sender-{address}"), node_address)
            .await
            .map_err(io_error)?;
        Ok(Arc::new(Amqp10Handle {
            sender: Mutex::new(sender),
        }))
    }
}

struct ReceiverAck {
    receiver: Arc<Mutex<Receiver>>,
    delivery: Mutex<Option<Delivery<Body<Vec<u8>>>>>,
}

#[async_trait]
impl Acknowledger for ReceiverAck {
    async fn ack(&self) {
        let Some(delivery) = self.delivery.lock().await.take() else {
            return;
        };
        let mut receiver = self.receiver.lock().await;
        if let Err(err) = receiver.accept(&delivery).await {
            log::warn!("failed to accept AMQP 1.0 delivery: {err}");
        }
    }
}

/// Drive `receiver`'s message stream into `events` until the link closes or detaches (spec
/// §4.6). Deliveries are accepted once the consumer worker finishes with them, never here.
///
/// # Errors
/// Returns a [`ConnectivityErrorKind::TransientIo`] error if receiving fails unrecoverably.
pub async fn run_consumer(
    receiver: Receiver,
    address: &str,
    events: mpsc::Sender<(ConsumerEvent, Box<dyn Acknowledger>)>,
) -> Result<(), ConnectivityError> {
    let receiver = Arc::new(Mutex::new(receiver));

    if events
        .send((ConsumerEvent::StreamStarted, Box::new(NoopAck)))
        .await
        .is_err()
    {
        return Ok(());
    }

    loop {
        let delivery = {
            let mut guard = receiver.lock().await;
            guard.recv::<Body<Vec<u8>>>().await
        };
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(RecvError::LinkStateError(_)) => break,
            Err(err) => {
                log::error!("AMQP 1.0 consumer for '{address}' failed: {err}");
                break;
            }
        };

        let payload = match delivery.body() {
            Body::Data(data) => data.iter().flat_map(|d| d.0.as_ref().to_vec()).collect(),
            Body::Value(_) | Body::Sequence(_) | Body::Empty => Vec::new(),
        };
        let content_type = delivery
            .message()
            .properties
            .as_ref()
            .and_then(|properties| properties.content_type.as_ref())
            .map(|symbol| symbol.to_string());

        let raw = RawMessage {
            payload,
            content_type,
            headers: std::collections::HashMap::new(),
            address: address.to_string(),
        };
        let ack = ReceiverAck {
            receiver: receiver.clone(),
            delivery: Mutex::new(Some(delivery)),
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
    fn parses_queue_prefix() {
        assert_eq!(parse_address("queue://inbox"), Amqp10Address::Queue("inbox".to_string()));
    }

    #[test]
    fn parses_topic_prefix() {
        assert_eq!(parse_address("topic://events"), Amqp10Address::Topic("events".to_string()));
    }

    #[test]
    fn bare_address_has_no_prefix() {
        assert_eq!(parse_address("plain"), Amqp10Address::Bare("plain".to_string()));
        assert_eq!(parse_address("plain").node_address(), "plain");
    }
}
