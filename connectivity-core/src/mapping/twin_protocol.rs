// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The default mapper (spec §4.2): parses/serializes the twin protocol's JSON envelope.
//!
//! The envelope's exact schema and topic grammar are a black box owned by the twin-protocol
//! adapter (spec §1, §9); this mapper only needs enough of its shape to extract/reattach the
//! thing identity, channel, and topic action-subject it routes signals by.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{ConnectivityError, ConnectivityErrorKind};
use crate::model::{Channel, ExternalMessage, Signal, SignalKind, ThingId};

/// Content type routed to this mapper by default when a message carries no explicit one.
pub const CONTENT_TYPE: &str = "application/vnd.eclipse.ditto+json";

#[derive(Deserialize)]
struct Envelope {
    topic: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    status: Option<u16>,
}

/// Parses/serializes the twin protocol's envelope (spec §4.2 "twin-protocol, default").
#[derive(Debug, Default, Clone)]
pub struct TwinProtocolMapper;

impl super::Mapper for TwinProtocolMapper {
    fn configure(&mut self, _options: &HashMap<String, String>) {}

    fn map_inbound(&self, message: &ExternalMessage) -> Result<Vec<Signal>, ConnectivityError> {
        let text = message.text.as_deref().ok_or_else(|| {
            ConnectivityError::new(ConnectivityErrorKind::MessageMappingFailed)
                .with_property("reason", "payload is not valid UTF-8")
        })?;

        let envelope: Envelope = serde_json::from_str(text).map_err(|e| {
            ConnectivityError::new(ConnectivityErrorKind::MessageMappingFailed)
                .with_property("reason", e.to_string())
        })?;

        let (thing_id, channel, action_subject) = parse_topic(&envelope.topic)?;

        let kind = if envelope.status.is_some() {
            SignalKind::CommandResponse
        } else if envelope.topic.contains("/errors") {
            SignalKind::ErrorResponse
        } else if envelope.topic.contains("/events") {
            SignalKind::Event
        } else {
            SignalKind::Command
        };

        let mut headers = envelope.headers;
        for (name, value) in &message.headers {
            headers.entry(name.clone()).or_insert_with(|| value.clone());
        }

        Ok(vec![Signal {
            kind,
            thing_id,
            headers,
            channel,
            topic_action_subject: action_subject,
            has_status: envelope.status.is_some(),
            payload: message.payload.clone(),
        }])
    }

    fn map_outbound(&self, signal: &Signal) -> Result<Vec<ExternalMessage>, ConnectivityError> {
        let text = ExternalMessage::decode_text(&signal.payload);
        Ok(vec![ExternalMessage {
            payload: signal.payload.clone(),
            text,
            content_type: Some(CONTENT_TYPE.to_string()),
            headers: signal.headers.clone(),
            source_address: String::new(),
            authorization_context: Vec::new(),
            enforcement_input: None,
            payload_mapping: Vec::new(),
            is_response: signal.has_status,
        }])
    }
}

/// Split a twin-protocol topic `{namespace}/{name}/things/{channel}/{group}/{action...}` into
/// the thing identity, channel, and the trailing action segment used as `topic:action-subject`
/// (spec §8 scenario 1).
fn parse_topic(topic: &str) -> Result<(ThingId, Channel, Option<String>), ConnectivityError> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < 5 || segments[2] != "things" {
        return Err(ConnectivityError::new(ConnectivityErrorKind::MessageMappingFailed)
            .with_property("topic", topic.to_string()));
    }
    let thing_id = ThingId {
        namespace: segments[0].to_string(),
        name: segments[1].to_string(),
    };
    let channel = match segments[3] {
        "twin" => Channel::Twin,
        "live" => Channel::Live,
        other => {
            return Err(
                ConnectivityError::new(ConnectivityErrorKind::MessageMappingFailed)
                    .with_property("channel", other.to_string()),
            )
        }
    };
    let action_subject = segments.last().copied().map(ToString::to_string);
    Ok((thing_id, channel, action_subject))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mapper;

    fn message(topic: &str, status: Option<u16>) -> ExternalMessage {
        let status_field = status
            .map(|s| format!(r#","status":{s}"#))
            .unwrap_or_default();
        let text = format!(
            r#"{{"topic":"{topic}","path":"/","value":{{}}{status_field}}}"#
        );
        ExternalMessage {
            payload: text.clone().into_bytes(),
            text: Some(text),
            content_type: Some(CONTENT_TYPE.to_string()),
            headers: HashMap::new(),
            source_address: "addr".to_string(),
            authorization_context: Vec::new(),
            enforcement_input: None,
            payload_mapping: Vec::new(),
            is_response: false,
        }
    }

    #[test]
    fn parses_command_topic() {
        let mapper = TwinProtocolMapper;
        let signals = mapper
            .map_inbound(&message("my/thing/things/twin/commands/modify", None))
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].thing_id.id(), "my:thing");
        assert_eq!(signals[0].channel, Channel::Twin);
        assert_eq!(signals[0].topic_action_subject.as_deref(), Some("modify"));
        assert_eq!(signals[0].kind, SignalKind::Command);
    }

    #[test]
    fn status_field_marks_command_response() {
        let mapper = TwinProtocolMapper;
        let signals = mapper
            .map_inbound(&message("my/thing/things/twin/commands/modify", Some(204)))
            .unwrap();
        assert!(signals[0].has_status);
        assert_eq!(signals[0].kind, SignalKind::CommandResponse);
    }

    #[test]
    fn rejects_non_utf8_payload() {
        let mapper = TwinProtocolMapper;
        let message = ExternalMessage {
            payload: vec![0xff, 0xfe],
            text: None,
            content_type: None,
            headers: HashMap::new(),
            source_address: "addr".to_string(),
            authorization_context: Vec::new(),
            enforcement_input: None,
            payload_mapping: Vec::new(),
            is_response: false,
        };
        assert!(mapper.map_inbound(&message).is_err());
    }
}
