// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The connectivity runtime's data model (spec §3): the entities a client state machine owns
//! as immutable snapshots for the lifetime of one connection generation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The wire protocol a [`Connection`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    /// AMQP 0.9.1 (e.g. RabbitMQ)
    Amqp091,
    /// AMQP 1.0
    Amqp10,
    /// MQTT 3.1.1
    Mqtt,
    /// Kafka
    Kafka,
    /// Outbound-only HTTP push
    HttpPush,
}

/// Administrative status of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// The connection is enabled and should be (re)opened by its supervisor.
    Open,
    /// The connection is administratively disabled.
    Closed,
}

/// A configured long-lived link to one external messaging endpoint (spec §3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique connection identifier.
    pub id: String,
    /// Wire protocol.
    pub connection_type: ConnectionType,
    /// Administrative status.
    pub connection_status: ConnectionStatus,
    /// Whether a failed connection attempt should trigger failover handling rather than a
    /// straightforward reconnect.
    #[serde(default)]
    pub failover_enabled: bool,
    /// Connection URI (scheme validated per protocol by a [`crate::validators::ProtocolValidator`]).
    pub uri: String,
    /// Inbound configuration fragments.
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Outbound configuration fragments.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Number of underlying protocol clients to open for this connection. MQTT restricts this
    /// to exactly 1 (spec §3, §4.5).
    #[serde(default = "default_client_count")]
    pub client_count: u32,
    /// Default authorization context applied to sources/targets that don't specify their own.
    #[serde(default)]
    pub authorization_context: Vec<String>,
    /// Mapper configuration, keyed by alias (spec §3 invariant: aliases unique within a
    /// connection).
    #[serde(default, rename = "mappingDefinitions")]
    pub mapping_definitions: HashMap<String, MappingContext>,
}

fn default_client_count() -> u32 {
    1
}

impl Connection {
    /// True if this connection's `client_count`/consumer-count invariants are MQTT's tighter
    /// ones (spec §3: "MQTT restricted to 1").
    #[must_use]
    pub fn is_mqtt(&self) -> bool {
        self.connection_type == ConnectionType::Mqtt
    }
}

/// An inbound configuration fragment within a [`Connection`] (spec §3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Wire-level subscription identifiers (e.g. MQTT topic filters, AMQP queue names).
    pub addresses: Vec<String>,
    /// Number of consumer workers to run against this source. MQTT: must be 1.
    #[serde(default = "default_consumer_count")]
    pub consumer_count: u32,
    /// Quality of service for inbound delivery. Mandatory (0-2) for MQTT sources.
    pub qos: Option<u8>,
    /// Authorization context; overrides the connection default when present.
    #[serde(default)]
    pub authorization_context: Vec<String>,
    /// Identity-based acceptance rule gating inbound messages.
    pub enforcement: Option<Enforcement>,
    /// Header projection/rename applied after inbound payload mapping.
    #[serde(default)]
    pub header_mapping: HashMap<String, String>,
    /// Ordered list of payload-mapping aliases; falls back to `[default]` when empty.
    #[serde(default)]
    pub payload_mapping: Vec<String>,
    /// Stable index disambiguating otherwise-equal sources within the same connection.
    #[serde(default)]
    pub index: usize,
}

fn default_consumer_count() -> u32 {
    1
}

/// An outbound configuration fragment within a [`Connection`] (spec §3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Address template, may contain placeholders from the topic/thing/header namespaces.
    pub address: String,
    /// Internal topics this target subscribes to (e.g. `_/things/twin/events`).
    #[serde(default)]
    pub topics: Vec<String>,
    /// Authorization context; overrides the connection default when present.
    #[serde(default)]
    pub authorization_context: Vec<String>,
    /// Quality of service for outbound delivery (MQTT default: 0).
    pub qos: Option<u8>,
    /// Header projection/rename applied before outbound payload mapping.
    #[serde(default)]
    pub header_mapping: HashMap<String, String>,
    /// Ordered list of payload-mapping aliases; falls back to `[default]` when empty.
    #[serde(default)]
    pub payload_mapping: Vec<String>,
}

/// A resolved outbound address plus the original, unresolved template preserved for logging
/// (spec §3, scenario 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// The address after placeholder substitution.
    pub resolved: String,
    /// The original template, unmodified, for diagnostic logging.
    pub original: String,
}

/// Identity-based acceptance rule (spec §4.1, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enforcement {
    /// Template resolved against the inbound message to obtain the value to check, e.g.
    /// `{{ source:address }}`.
    pub input: String,
    /// Templates resolved against the mapped signal's thing identity; acceptance requires the
    /// input to equal at least one of these after resolution.
    pub filters: Vec<String>,
}

/// Options for one mapper instance, keyed by alias within a [`Connection`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingContext {
    /// Which built-in (or, out of scope here, custom) mapper implementation to use.
    pub mapping_engine: String,
    /// Mapper-specific configuration. May carry stringified JSON for structured options.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// The bus-internal channel an inbound/outbound [`Signal`] travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Twin-state live events/commands.
    Twin,
    /// Feature/message channel.
    Live,
}

impl Channel {
    /// Render as the path segment used in wire topics (spec §6: `<ns>/<name>/things/<channel>/errors`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Twin => "twin",
            Channel::Live => "live",
        }
    }
}

/// The serialized wire form exchanged with an external broker (spec §3, GLOSSARY).
#[derive(Debug, Clone)]
pub struct ExternalMessage {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// UTF-8 decoded payload, when the bytes are valid UTF-8.
    pub text: Option<String>,
    /// MIME content type, if declared.
    pub content_type: Option<String>,
    /// Headers as received/to-be-sent. Insertion order is not semantically significant.
    pub headers: HashMap<String, String>,
    /// Wire-level address the message was received from (inbound) or will be sent to (outbound).
    pub source_address: String,
    /// Authorization context in effect for this message.
    pub authorization_context: Vec<String>,
    /// Enforcement filter input, pre-resolved against the wire address (inbound only).
    pub enforcement_input: Option<String>,
    /// Payload-mapping aliases to apply.
    pub payload_mapping: Vec<String>,
    /// True if this message is itself a response to an earlier request.
    pub is_response: bool,
}

impl ExternalMessage {
    /// Build the UTF-8 `text` view of `payload`, if decodable.
    #[must_use]
    pub fn decode_text(payload: &[u8]) -> Option<String> {
        std::str::from_utf8(payload).ok().map(ToString::to_string)
    }

    /// Read a header value, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// The kind of internal [`Signal`] (spec §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// A command directed at a thing.
    Command,
    /// A reply to a previously issued command.
    CommandResponse,
    /// A thing-state change notification.
    Event,
    /// An error reply, e.g. from enforcement or mapping failure.
    ErrorResponse,
}

/// An internal typed message flowing through the bus (spec §3, GLOSSARY). Treated as opaque by
/// the core except for its identity and headers.
#[derive(Debug, Clone)]
pub struct Signal {
    /// The signal's kind.
    pub kind: SignalKind,
    /// The addressed thing, e.g. `my.namespace:my-thing`.
    pub thing_id: ThingId,
    /// Headers, including `correlation-id`, `response-required`, the inbound mapper alias, and
    /// (for outbound error responses) the originating channel.
    pub headers: HashMap<String, String>,
    /// The channel this signal travels on (twin vs. live), used to synthesize error topics.
    pub channel: Channel,
    /// The topic-path's action/subject segment, used by outbound address placeholder
    /// resolution (spec §8 scenario 1: `topic:action-subject`).
    pub topic_action_subject: Option<String>,
    /// Whether this signal carries a `status` (i.e. it is itself a response).
    pub has_status: bool,
    /// Opaque payload bytes (the envelope body, beyond headers/identity).
    pub payload: Vec<u8>,
}

impl Signal {
    /// Correlation id, if present.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get("correlation-id").map(String::as_str)
    }

    /// Whether the sender requires a response (`response-required` header, defaults to true for
    /// commands per typical twin-protocol semantics, but the header is authoritative when set).
    #[must_use]
    pub fn response_required(&self) -> bool {
        self.headers
            .get("response-required")
            .map(|v| v != "false")
            .unwrap_or(true)
    }
}

/// A thing identifier, split into its namespace and name (spec §4.1 namespaces `thing:namespace`,
/// `thing:name`, `thing:id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThingId {
    /// The namespace segment.
    pub namespace: String,
    /// The name segment.
    pub name: String,
}

impl ThingId {
    /// Parse a `namespace:name` thing id.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        let (namespace, name) = id.split_once(':')?;
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// The combined `namespace:name` form.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for ThingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// A resolved publish address plus protocol-specific sub-parse (spec §3, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// An MQTT topic name plus the QoS to publish at.
    MqttTopic {
        /// Destination topic name.
        topic: String,
        /// Publish QoS (0-2).
        qos: u8,
    },
    /// An AMQP 1.0 address, already disambiguated between queue/topic/bare forms.
    Amqp10Address(String),
    /// An AMQP 0.9.1 exchange/routing-key pair (empty exchange routes via the default exchange).
    Amqp091 {
        /// Target exchange name. Empty string for the default exchange.
        exchange: String,
        /// Routing key.
        routing_key: String,
    },
    /// A Kafka topic and optional explicit partition key.
    Kafka {
        /// Destination topic.
        topic: String,
        /// Partition key; defaults to the outbound signal's thing-id when unset.
        partition_key: Option<String>,
    },
    /// An HTTP push destination URL.
    HttpUrl(String),
}

impl PublishTarget {
    /// Parse a [`crate::processor::process_outbound`]-resolved wire address into its
    /// protocol-specific structure, given the connection's wire protocol (spec §6).
    ///
    /// `process_outbound` has already appended the outbound signal's thing-id as the Kafka
    /// partition key fallback, and the target's QoS as the MQTT suffix, before an address
    /// reaches here, so no per-message or per-target context is needed at this layer.
    #[must_use]
    pub fn parse(connection_type: ConnectionType, address: &str) -> Self {
        match connection_type {
            ConnectionType::Mqtt => {
                let (topic, qos) = match address.rsplit_once('#') {
                    Some((topic, qos)) => (topic, qos.parse().unwrap_or(0)),
                    None => (address, 0),
                };
                PublishTarget::MqttTopic {
                    topic: topic.to_string(),
                    qos,
                }
            }
            ConnectionType::HttpPush => PublishTarget::HttpUrl(address.to_string()),
            ConnectionType::Amqp10 => PublishTarget::Amqp10Address(address.to_string()),
            ConnectionType::Amqp091 => {
                let (exchange, routing_key) = address.split_once('/').unwrap_or(("", address));
                PublishTarget::Amqp091 {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                }
            }
            ConnectionType::Kafka => {
                let (topic, partition_key) = match address.split_once('#') {
                    Some((topic, key)) => (topic, Some(key.to_string())),
                    None => (address, None),
                };
                PublishTarget::Kafka {
                    topic: topic.to_string(),
                    partition_key,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thing_id_round_trips() {
        let id = ThingId::parse("my:thing").unwrap();
        assert_eq!(id.namespace, "my");
        assert_eq!(id.name, "thing");
        assert_eq!(id.id(), "my:thing");
    }

    #[test]
    fn thing_id_parse_rejects_missing_colon() {
        assert!(ThingId::parse("no-colon").is_none());
    }

    #[test]
    fn response_required_defaults_true() {
        let signal = Signal {
            kind: SignalKind::Command,
            thing_id: ThingId::parse("ns:name").unwrap(),
            headers: HashMap::new(),
            channel: Channel::Twin,
            topic_action_subject: None,
            has_status: false,
            payload: Vec::new(),
        };
        assert!(signal.response_required());
    }

    #[test]
    fn publish_target_splits_amqp091_exchange_and_routing_key() {
        let target = PublishTarget::parse(ConnectionType::Amqp091, "events/thing.created");
        assert_eq!(
            target,
            PublishTarget::Amqp091 {
                exchange: "events".to_string(),
                routing_key: "thing.created".to_string(),
            }
        );
    }

    #[test]
    fn publish_target_defaults_amqp091_exchange_when_absent() {
        let target = PublishTarget::parse(ConnectionType::Amqp091, "my-queue");
        assert_eq!(
            target,
            PublishTarget::Amqp091 {
                exchange: String::new(),
                routing_key: "my-queue".to_string(),
            }
        );
    }

    #[test]
    fn publish_target_splits_kafka_topic_and_partition_key() {
        let target = PublishTarget::parse(ConnectionType::Kafka, "telemetry#my:thing");
        assert_eq!(
            target,
            PublishTarget::Kafka {
                topic: "telemetry".to_string(),
                partition_key: Some("my:thing".to_string()),
            }
        );
    }

    #[test]
    fn publish_target_kafka_partition_key_absent_when_not_encoded() {
        let target = PublishTarget::parse(ConnectionType::Kafka, "telemetry");
        assert_eq!(
            target,
            PublishTarget::Kafka {
                topic: "telemetry".to_string(),
                partition_key: None,
            }
        );
    }

    #[test]
    fn publish_target_splits_mqtt_topic_and_qos() {
        let target = PublishTarget::parse(ConnectionType::Mqtt, "my/thing/twin#1");
        assert_eq!(
            target,
            PublishTarget::MqttTopic {
                topic: "my/thing/twin".to_string(),
                qos: 1,
            }
        );
    }

    #[test]
    fn publish_target_mqtt_qos_defaults_to_zero_when_not_encoded() {
        let target = PublishTarget::parse(ConnectionType::Mqtt, "my/thing/twin");
        assert_eq!(
            target,
            PublishTarget::MqttTopic {
                topic: "my/thing/twin".to_string(),
                qos: 0,
            }
        );
    }
}
