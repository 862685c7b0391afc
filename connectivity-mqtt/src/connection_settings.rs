// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT transport connection settings.
//!
//! These are populated by the MQTT protocol adapter from a connection's `uri` and ambient
//! TLS/credential configuration; they are distinct from the wire-level [`Source`]/[`Target`]
//! configuration carried in a connection's JSON document.

use std::env::{self, VarError};
use std::time::Duration;

/// All the settings required to establish an MQTT connection.
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// Client identifier. MUST be unique per broker; a connection is restricted to a single
    /// underlying MQTT client (spec §3 Connection invariant: MQTT client-count == 1).
    pub(crate) client_id: String,
    /// FQDN or IP of the broker to connect to
    pub(crate) hostname: String,
    /// TCP port to connect to the broker on
    #[builder(default = "1883")]
    pub(crate) tcp_port: u16,
    /// Max time between communications
    #[builder(default = "Duration::from_secs(60)")]
    pub(crate) keep_alive: Duration,
    /// Connection establishment timeout
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) connection_timeout: Duration,
    /// Clean session flag (MQTT 3.1.1 §3.1.2.4)
    #[builder(default = "true")]
    pub(crate) clean_session: bool,
    /// Username for MQTT
    #[builder(default = "None")]
    pub(crate) username: Option<String>,
    /// Password for MQTT
    #[builder(default = "None")]
    pub(crate) password: Option<String>,
    /// TLS negotiation enabled
    #[builder(default = "true")]
    pub(crate) use_tls: bool,
    /// Path to a PEM file used to validate server identity. Falls back to the platform's
    /// native trust store when unset.
    #[builder(default = "None")]
    pub(crate) ca_file: Option<String>,
    /// Path to a PEM file used to establish X509 client authentication
    #[builder(default = "None")]
    pub(crate) cert_file: Option<String>,
    /// Path to a file containing the key paired with `cert_file`
    #[builder(default = "None")]
    pub(crate) key_file: Option<String>,
}

impl MqttConnectionSettings {
    /// Client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
    /// Broker hostname.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
    /// Broker TCP port.
    #[must_use]
    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }
    /// Keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }
    /// Connection establishment timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }
    /// Clean session flag.
    #[must_use]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }
    /// Username/password pair, if both are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
    /// Whether TLS negotiation is enabled.
    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }
    /// Path to the CA bundle, if overridden from the platform trust store.
    #[must_use]
    pub fn ca_file(&self) -> Option<&str> {
        self.ca_file.as_deref()
    }
    /// Path to the client certificate, if X509 client auth is configured.
    #[must_use]
    pub fn cert_file(&self) -> Option<&str> {
        self.cert_file.as_deref()
    }
    /// Path to the client key, if X509 client auth is configured.
    #[must_use]
    pub fn key_file(&self) -> Option<&str> {
        self.key_file.as_deref()
    }
}

impl MqttConnectionSettingsBuilder {
    /// Initialize the [`MqttConnectionSettingsBuilder`] from environment variables.
    ///
    /// # Errors
    /// Returns a `String` describing the error if any of the environment variables are invalid.
    pub fn from_environment() -> Result<Self, String> {
        let client_id = string_from_environment("CONNECTIVITY_MQTT_CLIENT_ID")?;
        let hostname = string_from_environment("CONNECTIVITY_MQTT_HOSTNAME")?;
        let tcp_port = string_from_environment("CONNECTIVITY_MQTT_TCP_PORT")?
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| format!("CONNECTIVITY_MQTT_TCP_PORT: {e}"))?;
        let keep_alive = string_from_environment("CONNECTIVITY_MQTT_KEEP_ALIVE_SECS")?
            .map(|v| v.parse::<u64>().map(Duration::from_secs))
            .transpose()
            .map_err(|e| format!("CONNECTIVITY_MQTT_KEEP_ALIVE_SECS: {e}"))?;
        let clean_session = string_from_environment("CONNECTIVITY_MQTT_CLEAN_SESSION")?
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| format!("CONNECTIVITY_MQTT_CLEAN_SESSION: {e}"))?;
        let username = string_from_environment("CONNECTIVITY_MQTT_USERNAME")?;
        let password = string_from_environment("CONNECTIVITY_MQTT_PASSWORD")?;
        let use_tls = string_from_environment("CONNECTIVITY_MQTT_USE_TLS")?
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| format!("CONNECTIVITY_MQTT_USE_TLS: {e}"))?;
        let ca_file = string_from_environment("CONNECTIVITY_MQTT_CA_FILE")?;
        let cert_file = string_from_environment("CONNECTIVITY_MQTT_CERT_FILE")?;
        let key_file = string_from_environment("CONNECTIVITY_MQTT_KEY_FILE")?;

        // NOTE: Do not error on missing values here - it is valid for the caller to override them
        // after construction. The errors from .build()'s validate() will surface a missing
        // client_id/hostname clearly enough at that point.
        if client_id.is_none() {
            log::warn!("CONNECTIVITY_MQTT_CLIENT_ID is not set in environment");
        }
        if hostname.is_none() {
            log::warn!("CONNECTIVITY_MQTT_HOSTNAME is not set in environment");
        }

        let mut builder = Self::default();
        if let Some(v) = client_id {
            builder = builder.client_id(v);
        }
        if let Some(v) = hostname {
            builder = builder.hostname(v);
        }
        if let Some(v) = tcp_port {
            builder = builder.tcp_port(v);
        }
        if let Some(v) = keep_alive {
            builder = builder.keep_alive(v);
        }
        if let Some(v) = clean_session {
            builder = builder.clean_session(v);
        }
        if let Some(v) = username {
            builder = builder.username(Some(v));
        }
        if let Some(v) = password {
            builder = builder.password(Some(v));
        }
        if let Some(v) = use_tls {
            builder = builder.use_tls(v);
        }
        if let Some(v) = ca_file {
            builder = builder.ca_file(Some(v));
        }
        if let Some(v) = cert_file {
            builder = builder.cert_file(Some(v));
        }
        if let Some(v) = key_file {
            builder = builder.key_file(Some(v));
        }
        Ok(builder)
    }

    /// Validation function for this builder, run by `derive_builder` before constructing the
    /// settings struct.
    fn validate(&self) -> Result<(), String> {
        if let Some(client_id) = &self.client_id {
            if client_id.is_empty() {
                return Err("client_id must not be empty".to_string());
            }
        }
        if let Some(hostname) = &self.hostname {
            if hostname.is_empty() {
                return Err("hostname must not be empty".to_string());
            }
        }
        if matches!((&self.cert_file, &self.key_file), (Some(Some(_)), None) | (None, Some(Some(_))))
        {
            return Err("cert_file and key_file must be set together".to_string());
        }
        Ok(())
    }
}

/// Read a string from an environment variable, returning `None` if unset, and an error if the
/// value is present but not valid unicode.
fn string_from_environment(key: &str) -> Result<Option<String>, String> {
    match env::var(key) {
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(format!("{key} is not valid unicode")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_client_id() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("")
            .hostname("localhost")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_mismatched_tls_material() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("client")
            .hostname("localhost")
            .cert_file(Some("cert.pem".to_string()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let settings = MqttConnectionSettingsBuilder::default()
            .client_id("client")
            .hostname("localhost")
            .build()
            .unwrap();
        assert_eq!(settings.tcp_port(), 1883);
        assert!(settings.clean_session());
        assert!(settings.use_tls());
    }
}
