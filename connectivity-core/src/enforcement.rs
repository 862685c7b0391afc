// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Enforcement (spec §4.1): accepts an inbound message iff its resolved input matches one of
//! its source's resolved filters.

use crate::error::{ConnectivityError, ConnectivityErrorKind};
use crate::model::{ConnectionType, Enforcement};
use crate::placeholder::{resolve, ResolutionMode, ResolverSet};

/// Resolve `enforcement.input` and every entry of `enforcement.filters` against `resolvers`,
/// then accept iff the resolved input equals at least one resolved filter.
///
/// MQTT connections compare using MQTT topic wildcard matching (`+`/`#`); every other
/// connection type compares by plain string equality (spec §4.1).
///
/// # Errors
/// Returns [`ConnectivityErrorKind::UnresolvedPlaceholder`] if the input or any filter template
/// references an unresolvable placeholder, or [`ConnectivityErrorKind::ConnectionSignalIdEnforcementFailed`]
/// if the input matches none of the filters.
pub fn check(
    enforcement: &Enforcement,
    connection_type: ConnectionType,
    resolvers: &ResolverSet<'_>,
) -> Result<(), ConnectivityError> {
    let resolved_input = resolve(&enforcement.input, resolvers, ResolutionMode::Strict)?;
    check_resolved_input(&resolved_input, &enforcement.filters, connection_type, resolvers)
}

/// As [`check`], but takes an already-resolved input value (spec §4.6: the consumer worker
/// pre-resolves `source.enforcement.input` against the wire address before the processor ever
/// sees it, via the `source:address` namespace).
///
/// # Errors
/// Returns [`ConnectivityErrorKind::UnresolvedPlaceholder`] if a filter template references an
/// unresolvable placeholder, or [`ConnectivityErrorKind::ConnectionSignalIdEnforcementFailed`] if
/// `resolved_input` matches none of the resolved filters.
pub fn check_resolved_input(
    resolved_input: &str,
    filters: &[String],
    connection_type: ConnectionType,
    resolvers: &ResolverSet<'_>,
) -> Result<(), ConnectivityError> {
    for filter in filters {
        let resolved_filter = resolve(filter, resolvers, ResolutionMode::Strict)?;
        if matches(connection_type, resolved_input, &resolved_filter) {
            return Ok(());
        }
    }

    Err(
        ConnectivityError::new(ConnectivityErrorKind::ConnectionSignalIdEnforcementFailed)
            .with_property("enforcement.input", resolved_input.to_string()),
    )
}

fn matches(connection_type: ConnectionType, input: &str, filter: &str) -> bool {
    if connection_type == ConnectionType::Mqtt {
        match (
            connectivity_mqtt::topic::TopicName::from_string(input.to_string()),
            connectivity_mqtt::topic::TopicFilter::from_string(filter.to_string()),
        ) {
            (Ok(name), Ok(filter)) => connectivity_mqtt::topic::topic_matches(&name, &filter),
            _ => input == filter,
        }
    } else {
        input == filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThingId;
    use std::collections::HashMap;

    #[test]
    fn mqtt_enforcement_accepts_matching_filter() {
        // spec §8 scenario 2
        let test_ns: HashMap<String, String> =
            [("placeholder".to_string(), "mqtt/topic/my/thing".to_string())].into();
        let thing = ThingId {
            namespace: "my".to_string(),
            name: "thing".to_string(),
        };
        let thing_ns: HashMap<String, String> = [
            ("namespace".to_string(), thing.namespace.clone()),
            ("name".to_string(), thing.name.clone()),
        ]
        .into();
        let resolvers = ResolverSet::new()
            .with_namespace("test", &test_ns)
            .with_namespace("thing", &thing_ns);

        let enforcement = Enforcement {
            input: "{{ test:placeholder }}".to_string(),
            filters: vec!["mqtt/topic/{{ thing:namespace }}/{{ thing:name }}".to_string()],
        };

        assert!(check(&enforcement, ConnectionType::Mqtt, &resolvers).is_ok());
    }

    #[test]
    fn mqtt_enforcement_rejects_mismatched_input() {
        // spec §8 scenario 3
        let test_ns: HashMap<String, String> =
            [("placeholder".to_string(), "some/invalid/target".to_string())].into();
        let thing_ns: HashMap<String, String> = [
            ("namespace".to_string(), "my".to_string()),
            ("name".to_string(), "thing".to_string()),
        ]
        .into();
        let resolvers = ResolverSet::new()
            .with_namespace("test", &test_ns)
            .with_namespace("thing", &thing_ns);

        let enforcement = Enforcement {
            input: "{{ test:placeholder }}".to_string(),
            filters: vec!["mqtt/topic/{{ thing:namespace }}/{{ thing:name }}".to_string()],
        };

        let err = check(&enforcement, ConnectionType::Mqtt, &resolvers).unwrap_err();
        assert_eq!(
            err.kind(),
            &ConnectivityErrorKind::ConnectionSignalIdEnforcementFailed
        );
    }

    #[test]
    fn non_mqtt_enforcement_uses_string_equality() {
        let resolvers = ResolverSet::new();
        let enforcement = Enforcement {
            input: "exact/address".to_string(),
            filters: vec!["exact/+/address".to_string(), "exact/address".to_string()],
        };
        assert!(check(&enforcement, ConnectionType::Kafka, &resolvers).is_ok());
    }
}
