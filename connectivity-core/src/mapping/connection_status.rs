// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Hono ConnectionStatus mapper (spec §4.2, §8 scenario 7): turns a device's
//! connect/disconnect/"time till disconnect" notification into a twin feature update.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::ConnectivityError;
use crate::mapping::Mapper;
use crate::model::{Channel, ExternalMessage, Signal, SignalKind, ThingId};
use crate::placeholder::{resolve, ResolutionMode, ResolverSet};

const FEATURE_DEFINITION: &str = "org.eclipse.ditto:ConnectionStatus:1.0.0";
const DEFAULT_FEATURE_ID: &str = "ConnectionStatus";
/// `9999-12-31T23:59:59Z`, used as `readyUntil` for an indefinitely-connected device (ttd == -1).
const DISTANT_FUTURE_MILLIS: i64 = 253_402_300_799_000;

/// Maps Hono's `ConnectionStatus` telemetry headers (`creation-time`, `ttd`) into
/// `ModifyFeature`/`ModifyFeatureProperty` twin commands (spec §4.2).
#[derive(Debug, Clone)]
pub struct ConnectionStatusMapper {
    thing_id_template: String,
    feature_id: String,
}

impl Default for ConnectionStatusMapper {
    fn default() -> Self {
        Self {
            thing_id_template: String::new(),
            feature_id: DEFAULT_FEATURE_ID.to_string(),
        }
    }
}

impl Mapper for ConnectionStatusMapper {
    fn configure(&mut self, options: &HashMap<String, String>) {
        if let Some(thing_id) = options.get("thingId") {
            self.thing_id_template = thing_id.clone();
        }
        if let Some(feature_id) = options.get("featureId") {
            self.feature_id = feature_id.clone();
        }
    }

    fn map_inbound(&self, message: &ExternalMessage) -> Result<Vec<Signal>, ConnectivityError> {
        Ok(self.try_map(message).unwrap_or_default())
    }

    fn map_outbound(&self, _signal: &Signal) -> Result<Vec<ExternalMessage>, ConnectivityError> {
        Ok(Vec::new())
    }
}

impl ConnectionStatusMapper {
    fn try_map(&self, message: &ExternalMessage) -> Option<Vec<Signal>> {
        let resolvers = ResolverSet::new().with_namespace("header", &message.headers);
        let thing_id_str =
            resolve(&self.thing_id_template, &resolvers, ResolutionMode::Strict).ok()?;
        let thing_id = ThingId::parse(&thing_id_str)?;

        let creation_time: i64 = message.header("creation-time")?.parse().ok()?;
        if creation_time < 0 {
            return None;
        }
        let ttd: i64 = message.header("ttd")?.parse().ok()?;
        if ttd < -1 {
            return None;
        }

        let (path, value) = match ttd {
            -1 => (
                format!("/features/{}", self.feature_id),
                serde_json::json!({
                    "definition": [FEATURE_DEFINITION],
                    "properties": { "status": { "readyUntil": millis_to_iso(DISTANT_FUTURE_MILLIS)? } }
                }),
            ),
            0 => (
                format!("/features/{}/properties/status/readyUntil", self.feature_id),
                serde_json::json!(millis_to_iso(creation_time)?),
            ),
            _ => (
                format!("/features/{}", self.feature_id),
                serde_json::json!({
                    "definition": [FEATURE_DEFINITION],
                    "properties": {
                        "status": {
                            "readySince": millis_to_iso(creation_time)?,
                            "readyUntil": millis_to_iso(creation_time + ttd * 1000)?,
                        }
                    }
                }),
            ),
        };

        let topic = format!(
            "{}/{}/things/twin/commands/modify",
            thing_id.namespace, thing_id.name
        );
        let envelope = serde_json::json!({ "topic": topic, "path": path, "value": value });
        let payload = serde_json::to_vec(&envelope).ok()?;

        let mut headers = HashMap::new();
        headers.insert("response-required".to_string(), "false".to_string());

        Some(vec![Signal {
            kind: SignalKind::Command,
            thing_id,
            headers,
            channel: Channel::Twin,
            topic_action_subject: Some("modify".to_string()),
            has_status: false,
            payload,
        }])
    }
}

fn millis_to_iso(millis: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn mapper() -> ConnectionStatusMapper {
        let mut mapper = ConnectionStatusMapper::default();
        let mut options = HashMap::new();
        options.insert("thingId".to_string(), "{{ header:device-id }}".to_string());
        mapper.configure(&options);
        mapper
    }

    fn message(creation_time: &str, ttd: &str) -> ExternalMessage {
        let mut headers = HashMap::new();
        headers.insert("device-id".to_string(), "my:thing".to_string());
        headers.insert("creation-time".to_string(), creation_time.to_string());
        headers.insert("ttd".to_string(), ttd.to_string());
        ExternalMessage {
            payload: Vec::new(),
            text: None,
            content_type: None,
            headers,
            source_address: "telemetry/my/thing".to_string(),
            authorization_context: Vec::new(),
            enforcement_input: None,
            payload_mapping: Vec::new(),
            is_response: false,
        }
    }

    #[test_case("1000", "0", "/features/ConnectionStatus/properties/status/readyUntil"; "ttd zero")]
    #[test_case("1000", "-1", "/features/ConnectionStatus"; "ttd indefinite")]
    #[test_case("1000", "10", "/features/ConnectionStatus"; "ttd ten seconds")]
    fn produces_expected_path(creation_time: &str, ttd: &str, expected_path: &str) {
        let signals = mapper().map_inbound(&message(creation_time, ttd)).unwrap();
        assert_eq!(signals.len(), 1);
        let envelope: serde_json::Value = serde_json::from_slice(&signals[0].payload).unwrap();
        assert_eq!(envelope["path"], expected_path);
    }

    #[test]
    fn ttd_zero_sets_ready_until_to_creation_time() {
        let signals = mapper().map_inbound(&message("1000", "0")).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&signals[0].payload).unwrap();
        assert_eq!(envelope["value"], "1970-01-01T00:00:01Z");
    }

    #[test]
    fn ttd_indefinite_sets_distant_ready_until() {
        let signals = mapper().map_inbound(&message("1000", "-1")).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&signals[0].payload).unwrap();
        assert_eq!(
            envelope["value"]["properties"]["status"]["readyUntil"],
            "9999-12-31T23:59:59Z"
        );
    }

    #[test]
    fn ttd_positive_sets_ready_since_and_until() {
        let signals = mapper().map_inbound(&message("1000", "10")).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&signals[0].payload).unwrap();
        assert_eq!(
            envelope["value"]["properties"]["status"]["readySince"],
            "1970-01-01T00:00:01Z"
        );
        assert_eq!(
            envelope["value"]["properties"]["status"]["readyUntil"],
            "1970-01-01T00:00:11Z"
        );
    }

    #[test]
    fn generated_signal_has_response_required_false() {
        let signals = mapper().map_inbound(&message("1000", "0")).unwrap();
        assert!(!signals[0].response_required());
    }

    #[test]
    fn missing_headers_yield_empty_result_not_error() {
        let message = ExternalMessage {
            payload: Vec::new(),
            text: None,
            content_type: None,
            headers: HashMap::new(),
            source_address: "addr".to_string(),
            authorization_context: Vec::new(),
            enforcement_input: None,
            payload_mapping: Vec::new(),
            is_response: false,
        };
        assert!(mapper().map_inbound(&message).unwrap().is_empty());
    }
}
