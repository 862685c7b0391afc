// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A supervised MQTT connection: connect/reconnect loop, publish dispatch, and session state.

use std::fmt;

use thiserror::Error;

pub mod connection;
mod dispatch;
pub mod reconnect_policy;
pub mod state;

pub use connection::{MqttConnection, ConnectionConnectionMonitor, ConnectionExitHandle};
pub use dispatch::IncomingPublishDispatcher;

/// Error returned by [`MqttConnection::run`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ConnectionError {
    kind: ConnectionErrorKind,
}

impl ConnectionError {
    #[must_use]
    pub(crate) fn kind(&self) -> &ConnectionErrorKind {
        &self.kind
    }
}

impl From<ConnectionErrorKind> for ConnectionError {
    fn from(kind: ConnectionErrorKind) -> Self {
        Self { kind }
    }
}

/// Categories of [`ConnectionError`].
#[derive(Debug)]
pub(crate) enum ConnectionErrorKind {
    /// The broker reports no session present after a reconnect that expected one.
    SessionLost,
    /// The reconnect policy declined to authorize another attempt.
    ReconnectHalted,
    /// A force exit was requested while waiting on a reconnect delay.
    ForceExit,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionErrorKind::SessionLost => {
                write!(f, "session state not present on broker after reconnect")
            }
            ConnectionErrorKind::ReconnectHalted => {
                write!(f, "reconnect policy halted further attempts")
            }
            ConnectionErrorKind::ForceExit => write!(f, "force exit requested"),
        }
    }
}

/// Error returned attempting to gracefully exit a [`MqttConnection`].
#[derive(Debug, Error)]
pub enum ConnectionExitError {
    /// The broker was not reachable to negotiate a graceful exit.
    #[error("broker unavailable (attempted: {attempted})")]
    BrokerUnavailable {
        /// Whether a disconnect request was actually sent before this error was returned.
        attempted: bool,
    },
    /// Disconnecting the underlying client failed.
    #[error(transparent)]
    Disconnect(#[from] crate::error::DisconnectError),
    /// The graceful exit did not complete within the requested timeout.
    #[error("timed out waiting for graceful exit")]
    Timeout(#[from] tokio::time::error::Elapsed),
}
