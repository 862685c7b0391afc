// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The supervised MQTT connection: the connect/reconnect loop driving one connection
//! generation of the client state machine (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::control_packet::QoS;
use crate::interface::{Event, Incoming, MqttDisconnect, MqttEventLoop};
use crate::session::dispatch::IncomingPublishDispatcher;
use crate::session::reconnect_policy::ReconnectPolicy;
use crate::session::state::SessionState;
use crate::session::{ConnectionError, ConnectionErrorKind, ConnectionExitError};
use crate::topic::TopicFilter;

/// Drives a single MQTT connection: polls the event loop, dispatches incoming publishes to
/// registered consumers, and reconnects with backoff on transient failure.
///
/// One [`MqttConnection`] instance corresponds to exactly one generation of the client state
/// machine (spec §4.8): a fresh instance is created for every reconnection.
pub struct MqttConnection<D, EL>
where
    D: MqttDisconnect + Clone + Send + Sync + 'static,
    EL: MqttEventLoop,
{
    disconnector: D,
    event_loop: EL,
    dispatcher: Arc<IncomingPublishDispatcher>,
    reconnect_policy: Box<dyn ReconnectPolicy + Send + Sync>,
    state: Arc<SessionState>,
    notify_force_exit: Arc<Notify>,
    previously_run: bool,
}

impl<D, EL> MqttConnection<D, EL>
where
    D: MqttDisconnect + Clone + Send + Sync + 'static,
    EL: MqttEventLoop,
{
    /// Build a new connection supervisor around an already-constructed client/event-loop pair.
    pub fn new(
        disconnector: D,
        event_loop: EL,
        reconnect_policy: Box<dyn ReconnectPolicy + Send + Sync>,
    ) -> Self {
        Self {
            disconnector,
            event_loop,
            dispatcher: Arc::new(IncomingPublishDispatcher::new()),
            reconnect_policy,
            state: Arc::new(SessionState::default()),
            notify_force_exit: Arc::new(Notify::new()),
            previously_run: false,
        }
    }

    /// Register a new receiver of incoming publishes matching `filter`, to be read by a
    /// consumer worker.
    pub fn register_filter(&self, filter: TopicFilter) -> tokio::sync::mpsc::Receiver<crate::control_packet::Publish> {
        self.dispatcher.register(filter)
    }

    /// Return a handle that can be used to end this connection from elsewhere (e.g. the client
    /// state machine's `CloseConnection` transition).
    #[must_use]
    pub fn create_exit_handle(&self) -> ConnectionExitHandle<D> {
        ConnectionExitHandle {
            disconnector: self.disconnector.clone(),
            state: self.state.clone(),
            force_exit: self.notify_force_exit.clone(),
        }
    }

    /// Return a handle that can be used to observe connection state transitions.
    #[must_use]
    pub fn create_connection_monitor(&self) -> ConnectionConnectionMonitor {
        ConnectionConnectionMonitor {
            state: self.state.clone(),
        }
    }

    /// Run the connect/reconnect loop until either a graceful exit is requested or the
    /// reconnect policy gives up.
    ///
    /// # Errors
    /// Returns a [`ConnectionError`] if the connection ends for a reason other than a
    /// requested exit.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        self.state.transition_running();
        if self.previously_run {
            log::error!("connection re-use is not supported; ending");
            return Err(ConnectionErrorKind::ReconnectHalted.into());
        }
        self.previously_run = true;

        let mut prev_connected = false;
        let mut prev_reconnect_attempts = 0;
        let mut result = Ok(());

        loop {
            let next = tokio::select! {
                biased;
                () = self.notify_force_exit.notified() => { break },
                next = self.event_loop.poll() => { next },
            };

            match next {
                Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                    self.state.transition_connected();
                    prev_reconnect_attempts = 0;
                    log::debug!("incoming CONNACK: {connack:?}");

                    if prev_connected && !connack.session_present {
                        log::error!("session state not present on broker after reconnect; ending connection");
                        result = Err(ConnectionErrorKind::SessionLost.into());
                        self.state.transition_session_desire_exit();
                    } else {
                        prev_connected = true;
                        self.event_loop.set_clean_session(false);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    log::debug!("incoming PUB: topic={} qos={:?}", publish.topic, publish.qos);
                    let publish: crate::control_packet::Publish = publish.into();
                    let delivered = self.dispatcher.dispatch(&publish);
                    if delivered == 0 && publish.qos != QoS::AtMostOnce {
                        log::warn!(
                            "no consumer registered for inbound publish on topic {}; dropping",
                            publish.topic
                        );
                    }
                }
                Ok(_other) => {
                    // Other incoming/outgoing events (SubAck, PingResp, ...) require no action.
                }
                Err(crate::error::ConnectionError::MqttState(_)) if self.state.desire_exit() => {
                    self.state.transition_disconnected();
                    break;
                }
                Err(e) => {
                    self.state.transition_disconnected();
                    log::error!("connection error: {e:?}");

                    if let Some(delay) = self
                        .reconnect_policy
                        .next_reconnect_delay(prev_reconnect_attempts, &e)
                    {
                        log::info!("attempting reconnect in {delay:?}");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = self.notify_force_exit.notified() => {
                                result = Err(ConnectionErrorKind::ForceExit.into());
                                break;
                            }
                        }
                    } else {
                        log::info!("reconnect attempts halted by reconnect policy");
                        result = Err(ConnectionErrorKind::ReconnectHalted.into());
                        break;
                    }
                    prev_reconnect_attempts += 1;
                }
            }
        }
        self.state.transition_exited();
        result
    }
}

/// Handle used to end an [`MqttConnection`] gracefully or forcibly.
#[derive(Clone)]
pub struct ConnectionExitHandle<D>
where
    D: MqttDisconnect + Clone + Send + Sync,
{
    disconnector: D,
    state: Arc<SessionState>,
    force_exit: Arc<Notify>,
}

impl<D> ConnectionExitHandle<D>
where
    D: MqttDisconnect + Clone + Send + Sync,
{
    /// Attempt to end the connection gracefully, returning once the underlying run loop has
    /// exited or the broker proves unreachable.
    ///
    /// # Errors
    /// Returns [`ConnectionExitError::BrokerUnavailable`] if not currently connected.
    pub async fn try_exit(&self) -> Result<(), ConnectionExitError> {
        if !self.state.is_connected() {
            return Err(ConnectionExitError::BrokerUnavailable { attempted: false });
        }
        self.state.transition_user_desire_exit();
        self.disconnector.disconnect().await?;
        tokio::select! {
            biased;
            () = self.state.condition_exited() => Ok(()),
            () = self.state.condition_disconnected() => Err(ConnectionExitError::BrokerUnavailable { attempted: true }),
        }
    }

    /// Like [`Self::try_exit`], but bounded by `timeout`.
    ///
    /// # Errors
    /// Returns [`ConnectionExitError::Timeout`] if the exit does not complete in time.
    pub async fn try_exit_timeout(&self, timeout: Duration) -> Result<(), ConnectionExitError> {
        tokio::time::timeout(timeout, self.try_exit()).await?
    }
}

/// Read-only observer of an [`MqttConnection`]'s connection state.
#[derive(Clone)]
pub struct ConnectionConnectionMonitor {
    state: Arc<SessionState>,
}

impl ConnectionConnectionMonitor {
    /// True if currently connected, to the best of the connection's knowledge.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Resolve once the connection reaches the connected state.
    pub async fn connected(&self) {
        self.state.condition_connected().await;
    }

    /// Resolve once the connection reaches the disconnected state.
    pub async fn disconnected(&self) {
        self.state.condition_disconnected().await;
    }
}
