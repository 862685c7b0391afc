// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Header mapping (spec §4.3): an ordered output-header-name -> value-template map, evaluated
//! against a message's current headers (plus `thing:*` and, inbound only, `source:*`).
//!
//! Unlike placeholder resolution elsewhere, an unresolved placeholder here is non-fatal: the
//! target header is simply omitted (spec §4.3).

use std::collections::HashMap;

use crate::model::{ExternalMessage, Signal, ThingId};
use crate::placeholder::{resolve, ResolutionMode, ResolverSet};

fn thing_namespace(thing_id: &ThingId) -> HashMap<String, String> {
    [
        ("namespace".to_string(), thing_id.namespace.clone()),
        ("name".to_string(), thing_id.name.clone()),
        ("id".to_string(), thing_id.id()),
    ]
    .into()
}

/// Apply `mapping` to `signal` after inbound payload mapping, injecting/renaming headers on the
/// produced signal (spec §4.3 "inbound: applied after payload mapping").
pub fn apply_inbound(
    mapping: &HashMap<String, String>,
    signal: &mut Signal,
    source_address: &str,
) {
    let thing_ns = thing_namespace(&signal.thing_id);
    let header_ns = signal.headers.clone();
    let source_ns: HashMap<String, String> =
        [("address".to_string(), source_address.to_string())].into();

    let resolvers = ResolverSet::new()
        .with_namespace("header", &header_ns)
        .with_namespace("thing", &thing_ns)
        .with_namespace("source", &source_ns);

    for (name, template) in mapping {
        if let Ok(value) = resolve(template, &resolvers, ResolutionMode::Strict) {
            signal.headers.insert(name.clone(), value);
        }
    }
}

/// Apply `mapping` to `message` after outbound payload mapping (spec §4.3 "outbound: applied
/// after payload mapping on external message").
pub fn apply_outbound(
    mapping: &HashMap<String, String>,
    message: &mut ExternalMessage,
    thing_id: &ThingId,
) {
    let thing_ns = thing_namespace(thing_id);
    let header_ns = message.headers.clone();

    let resolvers = ResolverSet::new()
        .with_namespace("header", &header_ns)
        .with_namespace("thing", &thing_ns);

    for (name, template) in mapping {
        if let Ok(value) = resolve(template, &resolvers, ResolutionMode::Strict) {
            message.headers.insert(name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, SignalKind};

    #[test]
    fn inbound_mapping_injects_header_from_thing_namespace() {
        let mut signal = Signal {
            kind: SignalKind::Event,
            thing_id: ThingId::parse("my:thing").unwrap(),
            headers: HashMap::new(),
            channel: Channel::Twin,
            topic_action_subject: None,
            has_status: false,
            payload: Vec::new(),
        };
        let mapping: HashMap<String, String> =
            [("x-thing-name".to_string(), "{{ thing:name }}".to_string())].into();
        apply_inbound(&mapping, &mut signal, "src/addr");
        assert_eq!(signal.headers.get("x-thing-name").unwrap(), "thing");
    }

    #[test]
    fn unresolved_placeholder_omits_target_header() {
        let mut signal = Signal {
            kind: SignalKind::Event,
            thing_id: ThingId::parse("my:thing").unwrap(),
            headers: HashMap::new(),
            channel: Channel::Twin,
            topic_action_subject: None,
            has_status: false,
            payload: Vec::new(),
        };
        let mapping: HashMap<String, String> =
            [("x-missing".to_string(), "{{ header:absent }}".to_string())].into();
        apply_inbound(&mapping, &mut signal, "src/addr");
        assert!(signal.headers.get("x-missing").is_none());
    }
}
