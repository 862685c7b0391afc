// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The message mapping processor (spec §4.4): the inbound pipeline (header-map -> payload-map x
//! enforcement -> signal) and outbound pipeline (payload-map -> header-map -> address-resolve).

use std::collections::HashMap;

use log::warn;

use crate::enforcement;
use crate::error::{ConnectivityError, ConnectivityErrorKind};
use crate::header_mapping;
use crate::mapping::{wrap_inbound, wrap_outbound, MapperRegistry, MappingLimits};
use crate::model::{
    Channel, ConnectionType, ExternalMessage, ResolvedAddress, Signal, SignalKind, Source,
    Target, ThingId,
};
use crate::placeholder::{resolve, ResolutionMode, ResolverSet};

/// The unknown thing identity Ditto conventionally uses when an inbound message could not be
/// mapped far enough to determine a real one (spec §9: the exact error-envelope grammar for this
/// case is delegated to the twin-protocol adapter and not fully specified here).
fn unknown_thing_id() -> ThingId {
    ThingId {
        namespace: "_".to_string(),
        name: "_".to_string(),
    }
}

/// The result of running one external message through the inbound pipeline.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Signals to hand to the internal bus.
    Forward(Vec<Signal>),
    /// Mapping or enforcement failed; this error-response signal should instead be routed
    /// through the outbound pipeline, addressed back to the originator (spec §4.4).
    ErrorResponse(Box<Signal>),
}

/// Run `message` through `source`'s inbound pipeline (spec §4.4 inbound path).
#[must_use]
pub fn process_inbound(
    source: &Source,
    connection_type: ConnectionType,
    message: &ExternalMessage,
    default_authorization_context: &[String],
    mappers: &MapperRegistry,
    limits: MappingLimits,
) -> InboundOutcome {
    let alias_list: Vec<String> = mappers
        .resolve_list(&source.payload_mapping)
        .into_iter()
        .map(ToString::to_string)
        .collect();

    let mut forwarded = Vec::new();
    for alias in &alias_list {
        let Some(mapper) = mappers.get(alias) else {
            return InboundOutcome::ErrorResponse(Box::new(error_response(
                message,
                unknown_thing_id(),
                Channel::Twin,
                &ConnectivityError::new(ConnectivityErrorKind::MessageMappingFailed)
                    .with_property("alias", alias.clone()),
            )));
        };
        match wrap_inbound(mapper, message, limits) {
            Ok(signals) => {
                for mut signal in signals {
                    signal
                        .headers
                        .insert("inbound-payload-mapper".to_string(), alias.clone());
                    forwarded.push(signal);
                }
            }
            Err(e) => {
                return InboundOutcome::ErrorResponse(Box::new(error_response(
                    message,
                    unknown_thing_id(),
                    Channel::Twin,
                    &e,
                )));
            }
        }
    }

    let authorization_context = if source.authorization_context.is_empty() {
        default_authorization_context
    } else {
        &source.authorization_context
    };

    for signal in &mut forwarded {
        let header_ns = message.headers.clone();
        let resolvers = ResolverSet::new().with_namespace("header", &header_ns);
        let mut resolved_subjects = Vec::with_capacity(authorization_context.len());
        for template in authorization_context {
            match resolve(template, &resolvers, ResolutionMode::Strict) {
                Ok(subject) => resolved_subjects.push(subject),
                Err(e) => {
                    return InboundOutcome::ErrorResponse(Box::new(error_response(
                        message,
                        signal.thing_id.clone(),
                        signal.channel,
                        &e,
                    )));
                }
            }
        }
        if !resolved_subjects.is_empty() {
            signal
                .headers
                .insert("authorization-context".to_string(), resolved_subjects.join(","));
        }
    }

    if let Some(enforcement) = &source.enforcement {
        let resolved_input = message.enforcement_input.clone().unwrap_or_default();
        for signal in &forwarded {
            let thing_ns: HashMap<String, String> = [
                ("namespace".to_string(), signal.thing_id.namespace.clone()),
                ("name".to_string(), signal.thing_id.name.clone()),
                ("id".to_string(), signal.thing_id.id()),
            ]
            .into();
            let resolvers = ResolverSet::new().with_namespace("thing", &thing_ns);
            if let Err(e) = enforcement::check_resolved_input(
                &resolved_input,
                &enforcement.filters,
                connection_type,
                &resolvers,
            ) {
                return InboundOutcome::ErrorResponse(Box::new(error_response(
                    message,
                    signal.thing_id.clone(),
                    signal.channel,
                    &e,
                )));
            }
        }
    }

    InboundOutcome::Forward(forwarded)
}

fn error_status(kind: &ConnectivityErrorKind) -> u16 {
    match kind {
        ConnectivityErrorKind::ConnectionSignalIdEnforcementFailed => 403,
        ConnectivityErrorKind::ThingNotAccessible => 404,
        ConnectivityErrorKind::TransientIo => 503,
        ConnectivityErrorKind::ConnectionConfigurationInvalid
        | ConnectivityErrorKind::MessageMappingFailed
        | ConnectivityErrorKind::UnresolvedPlaceholder { .. } => 400,
    }
}

/// Build an outbound error-response signal preserving the inbound correlation id, with a wire
/// topic ending in `/errors` reflecting the inbound thing-id and channel (spec §4.4, §6).
fn error_response(
    message: &ExternalMessage,
    thing_id: ThingId,
    channel: Channel,
    error: &ConnectivityError,
) -> Signal {
    let mut headers = HashMap::new();
    if let Some(correlation_id) = message.header("correlation-id") {
        headers.insert("correlation-id".to_string(), correlation_id.to_string());
    }
    headers.insert("response-required".to_string(), "false".to_string());

    let topic = format!(
        "{}/{}/things/{}/errors",
        thing_id.namespace,
        thing_id.name,
        channel.as_str()
    );
    let status = error_status(error.kind());
    let value = serde_json::json!({
        "status": status,
        "error": error.kind().to_string(),
        "message": error.property_value.clone().unwrap_or_default(),
    });
    let envelope = serde_json::json!({ "topic": topic, "path": "/", "value": value, "status": status });
    let payload = serde_json::to_vec(&envelope).unwrap_or_default();

    Signal {
        kind: SignalKind::ErrorResponse,
        thing_id,
        headers,
        channel,
        topic_action_subject: Some("errors".to_string()),
        has_status: true,
        payload,
    }
}

/// Run `signal` through the outbound pipeline against every target it matches (spec §4.4
/// outbound path). Each target's address is resolved independently; a failure on one target
/// drops only that target (logged), leaving the others unaffected.
#[must_use]
pub fn process_outbound(
    targets: &[Target],
    signal: &Signal,
    connection_type: ConnectionType,
    mappers: &MapperRegistry,
    limits: MappingLimits,
    max_message_size_bytes: usize,
) -> Vec<(ResolvedAddress, ExternalMessage)> {
    // Response suppression (spec §4.4, universal property): a command-response that doesn't
    // require a response is dropped silently before it ever reaches a target.
    if signal.kind == SignalKind::CommandResponse && !signal.response_required() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for target in targets {
        if !matches_target(target, signal) {
            continue;
        }

        let alias_list: Vec<String> = mappers
            .resolve_list(&target.payload_mapping)
            .into_iter()
            .map(ToString::to_string)
            .collect();

        for alias in &alias_list {
            let Some(mapper) = mappers.get(alias) else {
                warn!("outbound payload mapping alias '{alias}' not found, dropping target");
                continue;
            };
            let messages = match wrap_outbound(mapper, signal, limits) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("outbound mapping failed for target '{}': {e}", target.address);
                    continue;
                }
            };

            for mut message in messages {
                let resolved_address = match resolve_address(target, signal, connection_type) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!("address resolution failed for target '{}': {e}", target.address);
                        continue;
                    }
                };

                header_mapping::apply_outbound(&target.header_mapping, &mut message, &signal.thing_id);

                if message.payload.len() > max_message_size_bytes {
                    warn!(
                        "outbound message for target '{}' exceeds size limit ({} > {})",
                        target.address,
                        message.payload.len(),
                        max_message_size_bytes
                    );
                    continue;
                }

                message.source_address = resolved_address.resolved.clone();
                out.push((resolved_address, message));
            }
        }
    }
    out
}

fn matches_target(target: &Target, signal: &Signal) -> bool {
    target.topics.is_empty()
        || target
            .topics
            .iter()
            .any(|topic| topic.contains(signal.channel.as_str()))
}

fn resolve_address(
    target: &Target,
    signal: &Signal,
    connection_type: ConnectionType,
) -> Result<ResolvedAddress, ConnectivityError> {
    let thing_ns: HashMap<String, String> = [
        ("namespace".to_string(), signal.thing_id.namespace.clone()),
        ("name".to_string(), signal.thing_id.name.clone()),
        ("id".to_string(), signal.thing_id.id()),
    ]
    .into();
    let topic_ns: HashMap<String, String> = signal
        .topic_action_subject
        .clone()
        .map(|subject| [("action-subject".to_string(), subject)].into())
        .unwrap_or_default();
    let header_ns = signal.headers.clone();

    let resolvers = ResolverSet::new()
        .with_namespace("thing", &thing_ns)
        .with_namespace("topic", &topic_ns)
        .with_namespace("header", &header_ns);

    // An unregistered namespace prefix (e.g. a foreign vendor's placeholder) is kept literal
    // rather than dropping the whole target; a registered namespace with no value for the name
    // is still a hard error (spec §8 scenario 1).
    let mut resolved = resolve(&target.address, &resolvers, ResolutionMode::KeepUnknownNamespace)?;
    // Kafka partition key defaults to the outbound signal's thing-id when the resolved address
    // doesn't already encode one (spec §6).
    if connection_type == ConnectionType::Kafka && !resolved.contains('#') {
        resolved = format!("{resolved}#{}", signal.thing_id.id());
    }
    Ok(ResolvedAddress {
        resolved,
        original: target.address.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::twin_protocol::CONTENT_TYPE;

    fn make_message(text: &str, correlation_id: Option<&str>) -> ExternalMessage {
        let mut headers = HashMap::new();
        if let Some(cid) = correlation_id {
            headers.insert("correlation-id".to_string(), cid.to_string());
        }
        ExternalMessage {
            payload: text.as_bytes().to_vec(),
            text: Some(text.to_string()),
            content_type: Some(CONTENT_TYPE.to_string()),
            headers,
            source_address: "my/thing".to_string(),
            authorization_context: Vec::new(),
            enforcement_input: None,
            payload_mapping: Vec::new(),
            is_response: false,
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

    #[test]
    fn forwards_valid_command() {
        let message = make_message(
            r#"{"topic":"my/thing/things/twin/commands/modify","path":"/","value":{}}"#,
            Some("C"),
        );
        let outcome = process_inbound(
            &source(),
            ConnectionType::Kafka,
            &message,
            &[],
            &MapperRegistry::new(),
            MappingLimits::default(),
        );
        match outcome {
            InboundOutcome::Forward(signals) => {
                assert_eq!(signals.len(), 1);
                assert_eq!(signals[0].correlation_id(), Some("C"));
            }
            InboundOutcome::ErrorResponse(_) => panic!("expected forward"),
        }
    }

    #[test]
    fn malformed_payload_becomes_error_response_preserving_correlation_id() {
        // spec §8 scenario 5
        let message = make_message("not json", Some("C"));
        let outcome = process_inbound(
            &source(),
            ConnectionType::Kafka,
            &message,
            &[],
            &MapperRegistry::new(),
            MappingLimits::default(),
        );
        match outcome {
            InboundOutcome::ErrorResponse(signal) => {
                assert_eq!(signal.correlation_id(), Some("C"));
                let envelope: serde_json::Value = serde_json::from_slice(&signal.payload).unwrap();
                assert!(envelope["topic"].as_str().unwrap().ends_with("/errors"));
            }
            InboundOutcome::Forward(_) => panic!("expected error response"),
        }
    }

    #[test]
    fn enforcement_rejection_becomes_error_response() {
        let mut src = source();
        src.enforcement = Some(crate::model::Enforcement {
            input: "{{ header:unused }}".to_string(),
            filters: vec!["mqtt/topic/{{ thing:namespace }}/{{ thing:name }}".to_string()],
        });
        let mut message = make_message(
            r#"{"topic":"my/thing/things/twin/commands/modify","path":"/","value":{}}"#,
            Some("C"),
        );
        message.enforcement_input = Some("some/invalid/target".to_string());

        let outcome = process_inbound(
            &src,
            ConnectionType::Mqtt,
            &message,
            &[],
            &MapperRegistry::new(),
            MappingLimits::default(),
        );
        assert!(matches!(outcome, InboundOutcome::ErrorResponse(_)));
    }

    #[test]
    fn response_required_false_is_suppressed_outbound() {
        let signal = Signal {
            kind: SignalKind::CommandResponse,
            thing_id: ThingId::parse("my:thing").unwrap(),
            headers: [("response-required".to_string(), "false".to_string())].into(),
            channel: Channel::Twin,
            topic_action_subject: Some("modify".to_string()),
            has_status: true,
            payload: br#"{"topic":"my/thing/things/twin/commands/modify","path":"/","value":{},"status":204}"#.to_vec(),
        };
        let targets = vec![Target {
            address: "out/topic".to_string(),
            topics: Vec::new(),
            authorization_context: Vec::new(),
            qos: None,
            header_mapping: HashMap::new(),
            payload_mapping: Vec::new(),
        }];
        let out = process_outbound(
            &targets,
            &signal,
            ConnectionType::Kafka,
            &MapperRegistry::new(),
            MappingLimits::default(),
            1_000_000,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn topic_placeholder_resolved_independently_per_target() {
        // spec §8 scenario 1
        let signal = Signal {
            kind: SignalKind::Event,
            thing_id: ThingId::parse("my:thing").unwrap(),
            headers: HashMap::new(),
            channel: Channel::Twin,
            topic_action_subject: Some("some-subject".to_string()),
            has_status: false,
            payload: br#"{"topic":"my/thing/things/twin/events/some-subject","path":"/","value":{}}"#.to_vec(),
        };
        let targets = vec![
            Target {
                address: "some/topic/{{ topic:action-subject }}".to_string(),
                topics: Vec::new(),
                authorization_context: Vec::new(),
                qos: None,
                header_mapping: HashMap::new(),
                payload_mapping: Vec::new(),
            },
            Target {
                address: "some/topic/{{ eclipse:ditto }}".to_string(),
                topics: Vec::new(),
                authorization_context: Vec::new(),
                qos: None,
                header_mapping: HashMap::new(),
                payload_mapping: Vec::new(),
            },
            Target {
                address: "fixedAddress".to_string(),
                topics: Vec::new(),
                authorization_context: Vec::new(),
                qos: None,
                header_mapping: HashMap::new(),
                payload_mapping: Vec::new(),
            },
        ];
        let out = process_outbound(
            &targets,
            &signal,
            ConnectionType::Kafka,
            &MapperRegistry::new(),
            MappingLimits::default(),
            1_000_000,
        );
        // the second target's unregistered `eclipse` namespace is kept literal, not dropped.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].0.resolved, "some/topic/some-subject#my:thing");
        assert_eq!(out[0].0.original, "some/topic/{{ topic:action-subject }}");
        assert_eq!(
            out[1].0.resolved,
            "some/topic/{{ eclipse:ditto }}#my:thing"
        );
        assert_eq!(out[1].0.original, "some/topic/{{ eclipse:ditto }}");
        assert_eq!(out[2].0.resolved, "fixedAddress#my:thing");
    }

    #[test]
    fn kafka_partition_key_defaults_to_thing_id_when_address_has_none() {
        // spec §6: "partition key defaults to thing-id when unspecified"
        let signal = Signal {
            kind: SignalKind::Event,
            thing_id: ThingId::parse("my:thing").unwrap(),
            headers: HashMap::new(),
            channel: Channel::Twin,
            topic_action_subject: None,
            has_status: false,
            payload: br#"{"topic":"my/thing/things/twin/events/x","path":"/","value":{}}"#.to_vec(),
        };
        let targets = vec![Target {
            address: "telemetry".to_string(),
            topics: Vec::new(),
            authorization_context: Vec::new(),
            qos: None,
            header_mapping: HashMap::new(),
            payload_mapping: Vec::new(),
        }];
        let out = process_outbound(
            &targets,
            &signal,
            ConnectionType::Kafka,
            &MapperRegistry::new(),
            MappingLimits::default(),
            1_000_000,
        );
        assert_eq!(out[0].0.resolved, "telemetry#my:thing");
    }

    #[test]
    fn kafka_partition_key_preserved_when_address_already_encodes_one() {
        let signal = Signal {
            kind: SignalKind::Event,
            thing_id: ThingId::parse("my:thing").unwrap(),
            headers: HashMap::new(),
            channel: Channel::Twin,
            topic_action_subject: None,
            has_status: false,
            payload: br#"{"topic":"my/thing/things/twin/events/x","path":"/","value":{}}"#.to_vec(),
        };
        let targets = vec![Target {
            address: "telemetry#{{ thing:namespace }}".to_string(),
            topics: Vec::new(),
            authorization_context: Vec::new(),
            qos: None,
            header_mapping: HashMap::new(),
            payload_mapping: Vec::new(),
        }];
        let out = process_outbound(
            &targets,
            &signal,
            ConnectionType::Kafka,
            &MapperRegistry::new(),
            MappingLimits::default(),
            1_000_000,
        );
        assert_eq!(out[0].0.resolved, "telemetry#my");
    }
}
