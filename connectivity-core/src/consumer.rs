// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The consumer worker (spec §4.6): one per source, per `consumer_count`. Builds an
//! [`ExternalMessage`] from whatever the protocol library handed it, runs it through the
//! inbound processor, and acknowledges upstream regardless of mapping outcome.

use async_trait::async_trait;
use log::{error, warn};
use tokio::sync::mpsc;

use crate::error::ConnectivityError;
use crate::mapping::{MapperRegistry, MappingLimits};
use crate::model::{ConnectionType, ExternalMessage, Source};
use crate::processor::{process_inbound, InboundOutcome};

/// Lifecycle messages a consumer worker's protocol-specific stream driver reports (spec §4.6).
#[derive(Debug)]
pub enum ConsumerEvent {
    /// A raw message arrived; `ack` is called once this worker is done with it, whether or not
    /// mapping succeeded.
    Message(RawMessage),
    /// The underlying subscription was established.
    StreamStarted,
    /// The underlying subscription ended (broker-initiated or as part of shutdown).
    StreamEnded,
}

/// Enough of a protocol-library message to build an [`ExternalMessage`], plus a handle to
/// acknowledge it once the consumer worker is finished (spec §4.6).
#[derive(Debug)]
pub struct RawMessage {
    /// Raw payload bytes, as received.
    pub payload: Vec<u8>,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Headers/properties as received.
    pub headers: std::collections::HashMap<String, String>,
    /// The wire-level address/topic this message arrived on.
    pub address: String,
}

/// Acknowledges one inbound message to the upstream protocol client. Implemented per protocol
/// (spec §1: protocol adapters are thin wrappers around mature client libraries).
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledge the message, allowing the broker to consider it delivered.
    async fn ack(&self);
}

/// Resolves `source.enforcement.input` against the wire address a raw message arrived on, using
/// the `source:address` namespace (spec §4.6).
pub fn resolve_enforcement_input(source: &Source, address: &str) -> Option<String> {
    let enforcement = source.enforcement.as_ref()?;
    let source_ns: std::collections::HashMap<String, String> =
        [("address".to_string(), address.to_string())].into();
    let resolvers = crate::placeholder::ResolverSet::new().with_namespace("source", &source_ns);
    crate::placeholder::resolve(&enforcement.input, &resolvers, crate::placeholder::ResolutionMode::Strict).ok()
}

/// Build the [`ExternalMessage`] the processor expects from one [`RawMessage`] (spec §4.6 step
/// "build external message").
#[must_use]
pub fn build_external_message(
    source: &Source,
    raw: RawMessage,
    authorization_context: &[String],
) -> ExternalMessage {
    let text = ExternalMessage::decode_text(&raw.payload);
    let enforcement_input = resolve_enforcement_input(source, &raw.address);
    ExternalMessage {
        payload: raw.payload,
        text,
        content_type: raw.content_type,
        headers: raw.headers,
        source_address: raw.address,
        authorization_context: authorization_context.to_vec(),
        enforcement_input,
        payload_mapping: source.payload_mapping.clone(),
        is_response: false,
    }
}

/// Run one consumer worker's message loop until `events` closes (spec §4.6).
///
/// Every [`ConsumerEvent::Message`] is turned into an [`ExternalMessage`] and run through
/// [`process_inbound`]; the outcome is sent on `outcomes` and the message is acknowledged
/// regardless of mapping success, so a malformed message never blocks the head of the stream.
/// In `dry_run` mode, messages are acknowledged and silently discarded without ever reaching the
/// processor (spec §4.6 "dry-run mode: discard all messages silently").
pub async fn run(
    source: Source,
    connection_type: ConnectionType,
    default_authorization_context: Vec<String>,
    mappers: MapperRegistry,
    limits: MappingLimits,
    dry_run: bool,
    mut events: mpsc::Receiver<(ConsumerEvent, Box<dyn Acknowledger>)>,
    outcomes: mpsc::Sender<InboundOutcome>,
) {
    while let Some((event, ack)) = events.recv().await {
        match event {
            ConsumerEvent::StreamStarted => {}
            ConsumerEvent::StreamEnded => break,
            ConsumerEvent::Message(raw) => {
                ack.ack().await;
                if dry_run {
                    continue;
                }
                let authorization_context = if source.authorization_context.is_empty() {
                    default_authorization_context.clone()
                } else {
                    source.authorization_context.clone()
                };
                let message = build_external_message(&source, raw, &authorization_context);
                let outcome = process_inbound(
                    &source,
                    connection_type,
                    &message,
                    &default_authorization_context,
                    &mappers,
                    limits,
                );
                if outcomes.send(outcome).await.is_err() {
                    warn!("consumer worker's outcome channel closed, stopping");
                    break;
                }
            }
        }
    }
}

/// Build the [`ExternalMessage`]/mapping-failure split used when a raw message could not even be
/// turned into an [`ExternalMessage`] (a protocol-level failure, spec §4.6): still acknowledges
/// to avoid head-of-line blocking, and reports the failure for monitoring rather than tearing
/// down the stream.
pub fn report_protocol_failure(source_id: &str, error: &ConnectivityError) {
    error!("consumer for source '{source_id}' failed to build an external message: {error}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAck(Arc<AtomicUsize>);

    #[async_trait]
    impl Acknowledger for CountingAck {
        async fn ack(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn source() -> Source {
        Source {
            addresses: vec!["my/thing".to_string()],
            consumer_count: 1,
            qos: None,
            authorization_context: Vec::new(),
            enforcement: None,
            header_mapping: HashMap::new(),
            payload_mapping: Vec::new(),
            index: 0,
        }
    }

    #[tokio::test]
    async fn acks_even_when_mapping_fails() {
        let (event_tx, event_rx) = mpsc::channel(4);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(4);
        let ack_count = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(run(
            source(),
            ConnectionType::Kafka,
            Vec::new(),
            MapperRegistry::new(),
            MappingLimits::default(),
            false,
            event_rx,
            outcome_tx,
        ));

        event_tx
            .send((
                ConsumerEvent::Message(RawMessage {
                    payload: b"not json".to_vec(),
                    content_type: None,
                    headers: HashMap::new(),
                    address: "my/thing".to_string(),
                }),
                Box::new(CountingAck(ack_count.clone())),
            ))
            .await
            .unwrap();
        drop(event_tx);

        let outcome = outcome_rx.recv().await.unwrap();
        assert!(matches!(outcome, InboundOutcome::ErrorResponse(_)));
        assert_eq!(ack_count.load(Ordering::SeqCst), 1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_discards_without_processing() {
        let (event_tx, event_rx) = mpsc::channel(4);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(4);
        let ack_count = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(run(
            source(),
            ConnectionType::Kafka,
            Vec::new(),
            MapperRegistry::new(),
            MappingLimits::default(),
            true,
            event_rx,
            outcome_tx,
        ));

        event_tx
            .send((
                ConsumerEvent::Message(RawMessage {
                    payload: b"not json".to_vec(),
                    content_type: None,
                    headers: HashMap::new(),
                    address: "my/thing".to_string(),
                }),
                Box::new(CountingAck(ack_count.clone())),
            ))
            .await
            .unwrap();
        drop(event_tx);

        handle.await.unwrap();
        assert_eq!(ack_count.load(Ordering::SeqCst), 1);
        assert!(outcome_rx.try_recv().is_err());
    }
}
