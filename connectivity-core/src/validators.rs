// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Protocol validators (spec §4.5): per-connection-type URI scheme and source/target invariant
//! checks, run once before a connection is opened or test-connected.

use connectivity_mqtt::topic::{TopicFilter, TopicName};

use crate::error::{ConnectivityError, ConnectivityErrorKind};
use crate::mapping::MapperRegistry;
use crate::model::{Connection, ConnectionType};
use crate::placeholder;

/// Namespaces the core placeholder engine declares (spec §4.1); enforcement/address templates
/// may only reference these.
const DECLARED_NAMESPACES: &[&str] = &["header", "thing", "topic", "source"];

fn invalid(description: impl Into<String>) -> ConnectivityError {
    ConnectivityError::new(ConnectivityErrorKind::ConnectionConfigurationInvalid)
        .with_property("description", description.into())
}

/// Accepted URI schemes for a connection type (spec §4.5, §6).
fn accepted_schemes(connection_type: ConnectionType) -> &'static [&'static str] {
    match connection_type {
        ConnectionType::Amqp091 => &["amqp", "amqps"],
        ConnectionType::Amqp10 => &["amqp", "amqps"],
        ConnectionType::Mqtt => &["tcp", "ssl"],
        ConnectionType::Kafka => &["kafka"],
        ConnectionType::HttpPush => &["http", "https"],
    }
}

fn scheme_of(uri: &str) -> Option<&str> {
    uri.split_once("://").map(|(scheme, _)| scheme)
}

/// Validate `connection` and every source/target/mapping it declares, per spec §4.5.
///
/// # Errors
/// Returns [`ConnectivityErrorKind::ConnectionConfigurationInvalid`] with a human-readable
/// description of the first violation found.
pub fn validate(connection: &Connection, mappers: &MapperRegistry) -> Result<(), ConnectivityError> {
    let scheme = scheme_of(&connection.uri)
        .ok_or_else(|| invalid(format!("URI '{}' has no scheme", connection.uri)))?;
    if !accepted_schemes(connection.connection_type).contains(&scheme) {
        return Err(invalid(format!(
            "scheme '{scheme}' is not valid for connection type {:?}",
            connection.connection_type
        )));
    }

    if connection.is_mqtt() && connection.client_count != 1 {
        return Err(invalid("MQTT connections must have exactly one client"));
    }

    for source in &connection.sources {
        if connection.is_mqtt() {
            if source.consumer_count != 1 {
                return Err(invalid("MQTT sources must have exactly one consumer"));
            }
            if source.qos.is_none() {
                return Err(invalid("MQTT sources require an explicit QoS"));
            }
            if !source.header_mapping.is_empty() {
                return Err(invalid("MQTT sources may not declare a header mapping"));
            }
            for address in &source.addresses {
                TopicFilter::from_string(address.clone())
                    .map_err(|e| invalid(format!("invalid MQTT source topic filter: {e}")))?;
            }
        }
        if let Some(qos) = source.qos {
            if qos > 2 {
                return Err(invalid("QoS must be 0, 1, or 2"));
            }
        }
        if let Some(enforcement) = &source.enforcement {
            validate_namespaces(&enforcement.input)?;
            for filter in &enforcement.filters {
                validate_namespaces(filter)?;
            }
        }
        for alias in &source.payload_mapping {
            if mappers.get(alias).is_none() {
                return Err(invalid(format!("unknown payload mapping alias '{alias}'")));
            }
        }
    }

    for target in &connection.targets {
        if connection.is_mqtt() {
            if target.qos.is_none() {
                return Err(invalid("MQTT targets require an explicit QoS"));
            }
            if !target.header_mapping.is_empty() {
                return Err(invalid("MQTT targets may not declare a header mapping"));
            }
            if !placeholder::tokens(&target.address).is_empty() {
                // Placeholders are resolved before a literal topic name check applies; skip the
                // wildcard check here and defer to address resolution at publish time.
            } else {
                TopicName::from_string(target.address.clone())
                    .map_err(|e| invalid(format!("invalid MQTT target topic name: {e}")))?;
            }
        }
        validate_namespaces(&target.address)?;
        for alias in &target.payload_mapping {
            if mappers.get(alias).is_none() {
                return Err(invalid(format!("unknown payload mapping alias '{alias}'")));
            }
        }
    }

    Ok(())
}

fn validate_namespaces(template: &str) -> Result<(), ConnectivityError> {
    for token in placeholder::tokens(template) {
        if !DECLARED_NAMESPACES.contains(&token.namespace.as_str()) {
            return Err(invalid(format!(
                "undeclared placeholder namespace '{}'",
                token.namespace
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionStatus, Source, Target};

    fn base_connection(connection_type: ConnectionType, uri: &str) -> Connection {
        Connection {
            id: "conn".to_string(),
            connection_type,
            connection_status: ConnectionStatus::Open,
            failover_enabled: false,
            uri: uri.to_string(),
            sources: Vec::new(),
            targets: Vec::new(),
            client_count: 1,
            authorization_context: Vec::new(),
            mapping_definitions: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn rejects_wrong_scheme() {
        let connection = base_connection(ConnectionType::Mqtt, "amqp://broker:5672");
        assert!(validate(&connection, &MapperRegistry::new()).is_err());
    }

    #[test]
    fn accepts_valid_mqtt_connection() {
        let mut connection = base_connection(ConnectionType::Mqtt, "tcp://broker:1883");
        connection.sources.push(Source {
            addresses: vec!["some/+/topic".to_string()],
            consumer_count: 1,
            qos: Some(1),
            authorization_context: Vec::new(),
            enforcement: None,
            header_mapping: std::collections::HashMap::new(),
            payload_mapping: Vec::new(),
            index: 0,
        });
        connection.targets.push(Target {
            address: "some/topic".to_string(),
            topics: Vec::new(),
            authorization_context: Vec::new(),
            qos: Some(0),
            header_mapping: std::collections::HashMap::new(),
            payload_mapping: Vec::new(),
        });
        assert!(validate(&connection, &MapperRegistry::new()).is_ok());
    }

    #[test]
    fn rejects_mqtt_target_with_wildcard() {
        let mut connection = base_connection(ConnectionType::Mqtt, "tcp://broker:1883");
        connection.targets.push(Target {
            address: "some/+/topic".to_string(),
            topics: Vec::new(),
            authorization_context: Vec::new(),
            qos: Some(0),
            header_mapping: std::collections::HashMap::new(),
            payload_mapping: Vec::new(),
        });
        assert!(validate(&connection, &MapperRegistry::new()).is_err());
    }

    #[test]
    fn rejects_undeclared_namespace_in_enforcement() {
        let mut connection = base_connection(ConnectionType::Kafka, "kafka://broker:9092");
        connection.sources.push(Source {
            addresses: vec!["topic".to_string()],
            consumer_count: 1,
            qos: None,
            authorization_context: Vec::new(),
            enforcement: Some(crate::model::Enforcement {
                input: "{{ eclipse:ditto }}".to_string(),
                filters: vec!["literal".to_string()],
            }),
            header_mapping: std::collections::HashMap::new(),
            payload_mapping: Vec::new(),
            index: 0,
        });
        assert!(validate(&connection, &MapperRegistry::new()).is_err());
    }
}
