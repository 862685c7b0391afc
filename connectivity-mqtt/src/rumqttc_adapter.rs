// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer for the `rumqttc` crate (MQTT 3.1.1 / v4 client).

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection_settings::MqttConnectionSettings;
use crate::control_packet::{Publish, QoS};
use crate::error::{AckError, ConnectionError, DisconnectError, PublishError, SubscribeError};
use crate::interface::{Event, MqttAck, MqttDisconnect, MqttEventLoop, MqttPubSub, UnsubscribeError};

/// Client handle alias for the `rumqttc` adapter.
pub type ClientAlias = rumqttc::AsyncClient;
/// Event loop alias for the `rumqttc` adapter.
pub type EventLoopAlias = rumqttc::EventLoop;

#[async_trait]
impl MqttPubSub for rumqttc::AsyncClient {
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<(), PublishError> {
        let payload: Bytes = payload.into();
        Ok(self.publish(topic, qos.into(), retain, payload.to_vec()).await?)
    }

    async fn subscribe(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<(), SubscribeError> {
        Ok(self.subscribe(topic, qos.into()).await?)
    }

    async fn unsubscribe(&self, topic: impl Into<String> + Send) -> Result<(), UnsubscribeError> {
        Ok(self.unsubscribe(topic).await?)
    }
}

#[async_trait]
impl MqttAck for rumqttc::AsyncClient {
    async fn ack(&self, publish: &Publish) -> Result<(), AckError> {
        // rumqttc's manual-ack API works off its own `Publish` type, reconstructed here because
        // our `Publish` is a protocol-neutral copy rather than a borrow of the original packet.
        let inner = rumqttc::Publish::new(&publish.topic, publish.qos.into(), &publish.payload[..]);
        Ok(self.ack(&inner).await?)
    }
}

#[async_trait]
impl MqttDisconnect for rumqttc::AsyncClient {
    async fn disconnect(&self) -> Result<(), DisconnectError> {
        Ok(self.disconnect().await?)
    }
}

#[async_trait]
impl MqttEventLoop for rumqttc::EventLoop {
    async fn poll(&mut self) -> Result<Event, ConnectionError> {
        self.poll().await
    }

    fn set_clean_session(&mut self, clean_session: bool) {
        self.mqtt_options.set_clean_session(clean_session);
    }
}

/// Build a `rumqttc` client/event-loop pair from [`MqttConnectionSettings`].
///
/// # Errors
/// Returns an error if TLS material referenced by the settings cannot be read.
pub fn new_client(
    settings: &MqttConnectionSettings,
    event_channel_capacity: usize,
) -> Result<(ClientAlias, EventLoopAlias), std::io::Error> {
    let mut options = rumqttc::MqttOptions::new(
        settings.client_id(),
        settings.hostname(),
        settings.tcp_port(),
    );
    options.set_keep_alive(settings.keep_alive());
    options.set_clean_session(settings.clean_session());

    if let Some((username, password)) = settings.credentials() {
        options.set_credentials(username, password);
    }

    if settings.use_tls() {
        options.set_transport(build_transport(settings)?);
    }

    let (client, mut event_loop) = rumqttc::AsyncClient::new(options, event_channel_capacity);
    let mut network_options = rumqttc::NetworkOptions::new();
    network_options.set_connection_timeout(settings.connection_timeout().as_secs());
    event_loop.set_network_options(network_options);

    Ok((client, event_loop))
}

fn build_transport(
    settings: &MqttConnectionSettings,
) -> Result<rumqttc::Transport, std::io::Error> {
    let mut root_store = rumqttc::tokio_rustls::rustls::RootCertStore::empty();
    if let Some(ca_file) = settings.ca_file() {
        let mut reader = std::io::BufReader::new(std::fs::File::open(ca_file)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            root_store.add(cert?).ok();
        }
    } else {
        for cert in rustls_native_certs::load_native_certs()? {
            root_store.add(cert).ok();
        }
    }

    let builder = rumqttc::tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(root_store);

    let config = if let (Some(cert_file), Some(key_file)) =
        (settings.cert_file(), settings.key_file())
    {
        let certs = load_certs(cert_file)?;
        let key = load_key(key_file)?;
        builder
            .with_client_auth_cert(certs, key)
            .map_err(std::io::Error::other)?
    } else {
        builder.with_no_client_auth()
    };

    Ok(rumqttc::Transport::tls_with_config(config.into()))
}

fn load_certs(
    path: &str,
) -> Result<Vec<rumqttc::tokio_rustls::rustls::pki_types::CertificateDer<'static>>, std::io::Error>
{
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

fn load_key(
    path: &str,
) -> Result<rumqttc::tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>, std::io::Error> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::other("no private key found in key file"))
}
