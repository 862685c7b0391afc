// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-connection client state machine (spec §4.8): a plain tagged-union state plus a
//! generation-scoped kill-switch shared by every consumer stream of one successful connect
//! (spec §9: "not inheritance").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectivityError, ConnectivityErrorKind};

/// The client state machine's externally-visible state (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No publisher or consumers running.
    Disconnected,
    /// Publisher/consumers are starting up.
    Connecting,
    /// Exactly one publisher and `sum(source.consumer_count)` consumers are running.
    Connected,
    /// The shared kill-switch has been triggered; waiting for every consumer stream to finish.
    Disconnecting,
    /// A test-connection attempt is in flight (reachable only from `Disconnected`).
    Testing,
}

/// Per-address status reported by [`ClientStateMachine::retrieve_status`] (spec §4.8
/// `RetrieveStatus`).
#[derive(Debug, Clone)]
pub struct AddressStatus {
    /// The address this status concerns.
    pub address: String,
    /// Human-readable status summary.
    pub detail: String,
}

/// One successful connect's lifetime: every consumer stream started under a generation shares
/// its [`CancellationToken`]; reconnection installs a fresh generation rather than mutating
/// state in place (spec §4.8, GLOSSARY).
struct Generation {
    id: u64,
    kill_switch: CancellationToken,
    /// Signalled once every consumer stream belonging to this generation has observed
    /// cancellation and finished; joined before the publisher is stopped (spec §5).
    all_streams_done: Arc<Notify>,
    active_streams: Arc<std::sync::atomic::AtomicUsize>,
}

impl Generation {
    fn new(id: u64) -> Self {
        Self {
            id,
            kill_switch: CancellationToken::new(),
            all_streams_done: Arc::new(Notify::new()),
            active_streams: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    fn register_stream(&self) -> StreamGuard {
        self.active_streams
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        StreamGuard {
            active_streams: self.active_streams.clone(),
            all_streams_done: self.all_streams_done.clone(),
        }
    }

    async fn join(&self) {
        while self.active_streams.load(std::sync::atomic::Ordering::SeqCst) > 0 {
            self.all_streams_done.notified().await;
        }
    }
}

/// Held by a running consumer stream; dropping it (on stream exit) decrements the generation's
/// active-stream count and wakes [`Generation::join`] once it reaches zero.
pub struct StreamGuard {
    active_streams: Arc<std::sync::atomic::AtomicUsize>,
    all_streams_done: Arc<Notify>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self
            .active_streams
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst)
            == 1
        {
            self.all_streams_done.notify_waiters();
        }
    }
}

struct Inner {
    state: ClientState,
    generation: Option<Generation>,
    next_generation_id: u64,
    pending_test: Option<oneshot::Sender<Result<(), ConnectivityError>>>,
}

/// Supervises one connection's lifecycle: `OpenConnection`/`TestConnection`, `CloseConnection`,
/// `ConnectionFailure`, and `RetrieveStatus` (spec §4.8). Modeled as a guarded tagged-union state
/// rather than a type per state, per spec §9.
pub struct ClientStateMachine {
    inner: RwLock<Inner>,
    state_changed: Notify,
}

impl Default for ClientStateMachine {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: ClientState::Disconnected,
                generation: None,
                next_generation_id: 0,
                pending_test: None,
            }),
            state_changed: Notify::new(),
        }
    }
}

impl ClientStateMachine {
    /// A fresh machine in [`ClientState::Disconnected`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state.
    pub async fn state(&self) -> ClientState {
        self.inner.read().await.state
    }

    async fn set_state(&self, state: ClientState) {
        self.inner.write().await.state = state;
        self.state_changed.notify_waiters();
    }

    /// `OpenConnection` (spec §4.8): only valid from `Disconnected`. Starts a fresh generation
    /// and transitions to `Connecting`; the caller is responsible for actually starting the
    /// publisher/consumers and calling [`ClientStateMachine::mark_connected`] once every stream
    /// reports success.
    ///
    /// # Errors
    /// Returns [`ConnectivityErrorKind::ConnectionConfigurationInvalid`] if not currently
    /// `Disconnected`.
    pub async fn open(&self) -> Result<(), ConnectivityError> {
        let mut inner = self.inner.write().await;
        if inner.state != ClientState::Disconnected {
            return Err(invalid_transition(inner.state, "OpenConnection"));
        }
        inner.generation = Some(Generation::new(inner.next_generation_id));
        inner.next_generation_id += 1;
        inner.state = ClientState::Connecting;
        drop(inner);
        self.state_changed.notify_waiters();
        Ok(())
    }

    /// `TestConnection` (spec §4.8): like [`open`](Self::open), but completes `future` exactly
    /// once (with success or the first observed failure) instead of settling into `Connected`.
    ///
    /// # Errors
    /// Returns [`ConnectivityErrorKind::ConnectionConfigurationInvalid`] if not currently
    /// `Disconnected`.
    pub async fn test(&self) -> Result<oneshot::Receiver<Result<(), ConnectivityError>>, ConnectivityError> {
        let mut inner = self.inner.write().await;
        if inner.state != ClientState::Disconnected {
            return Err(invalid_transition(inner.state, "TestConnection"));
        }
        inner.generation = Some(Generation::new(inner.next_generation_id));
        inner.next_generation_id += 1;
        inner.state = ClientState::Testing;
        let (tx, rx) = oneshot::channel();
        inner.pending_test = Some(tx);
        drop(inner);
        self.state_changed.notify_waiters();
        Ok(rx)
    }

    /// All per-stream `Success` reports have arrived: settle into `Connected`, or complete a
    /// pending test future with success (spec §4.8).
    pub async fn mark_connected(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            ClientState::Connecting => inner.state = ClientState::Connected,
            ClientState::Testing => {
                if let Some(tx) = inner.pending_test.take() {
                    let _ = tx.send(Ok(()));
                }
                inner.state = ClientState::Disconnected;
                inner.generation = None;
            }
            _ => {}
        }
        drop(inner);
        self.state_changed.notify_waiters();
    }

    /// `ConnectionFailure` (spec §4.8): fails a pending test future, or -- outside test mode --
    /// tears the generation down so the caller can decide whether to reconnect (spec: "initiate
    /// reconnection (failover-dependent)" is the caller's responsibility, not the machine's).
    pub async fn mark_failed(&self, error: ConnectivityError) {
        let mut inner = self.inner.write().await;
        if let Some(tx) = inner.pending_test.take() {
            // A pending test future is completed exactly once; any later result is dropped
            // (spec §5).
            let _ = tx.send(Err(error));
        }
        inner.state = ClientState::Disconnected;
        inner.generation = None;
        drop(inner);
        self.state_changed.notify_waiters();
    }

    /// `CloseConnection` (spec §4.8): activates the shared kill-switch, transitions to
    /// `Disconnecting`, and returns a future that resolves once every consumer stream of this
    /// generation has finished. The caller must await it before stopping the publisher and
    /// re-entering `Disconnected` via [`ClientStateMachine::finish_closing`] (spec §5: "joined
    /// termination future MUST complete before publisher shutdown").
    ///
    /// # Errors
    /// Returns [`ConnectivityErrorKind::ConnectionConfigurationInvalid`] if not currently
    /// `Connected`.
    pub async fn close(&self) -> Result<(), ConnectivityError> {
        let mut inner = self.inner.write().await;
        if inner.state != ClientState::Connected {
            return Err(invalid_transition(inner.state, "CloseConnection"));
        }
        if let Some(generation) = &inner.generation {
            generation.kill_switch.cancel();
        }
        inner.state = ClientState::Disconnecting;
        drop(inner);
        self.state_changed.notify_waiters();
        Ok(())
    }

    /// Wait for every consumer stream of the current generation to finish after [`close`](Self::close).
    pub async fn join_termination(&self) {
        let generation_join = {
            let inner = self.inner.read().await;
            inner.generation.as_ref().map(|g| g.active_streams.clone())
        };
        if let Some(active_streams) = generation_join {
            loop {
                if active_streams.load(std::sync::atomic::Ordering::SeqCst) == 0 {
                    break;
                }
                self.state_changed.notified().await;
            }
        }
    }

    /// Complete the `CloseConnection` transition after [`join_termination`](Self::join_termination)
    /// and the publisher has stopped: re-enter `Disconnected`, freeing the machine to `open`
    /// again (spec §4.8).
    pub async fn finish_closing(&self) {
        let mut inner = self.inner.write().await;
        inner.state = ClientState::Disconnected;
        inner.generation = None;
        drop(inner);
        self.state_changed.notify_waiters();
    }

    /// The current generation's kill-switch, cloned for a newly-started consumer stream, plus a
    /// guard the stream should hold for its lifetime (spec §5, §9).
    pub async fn register_stream(&self) -> Option<(CancellationToken, StreamGuard)> {
        let inner = self.inner.read().await;
        inner
            .generation
            .as_ref()
            .map(|g| (g.kill_switch.clone(), g.register_stream()))
    }

    /// The current generation's id, for logging/diagnostics.
    pub async fn generation_id(&self) -> Option<u64> {
        self.inner.read().await.generation.as_ref().map(|g| g.id)
    }

    /// `RetrieveStatus` (spec §4.8): aggregate per-address status. The core machine only tracks
    /// lifecycle state; callers supply the per-address detail (consumer/publisher-specific).
    pub async fn retrieve_status(&self, addresses: &[String]) -> Vec<AddressStatus> {
        let state = self.state().await;
        addresses
            .iter()
            .map(|address| AddressStatus {
                address: address.clone(),
                detail: format!("{state:?}"),
            })
            .collect()
    }
}

fn invalid_transition(state: ClientState, event: &str) -> ConnectivityError {
    ConnectivityError::new(ConnectivityErrorKind::ConnectionConfigurationInvalid).with_property(
        "transition",
        format!("{event} is not valid from state {state:?}"),
    )
}

/// Bounded-timeout ask-style status query (spec §5: "ask-style status queries, bounded timeout,
/// default 1s for publisher-readiness probe").
///
/// # Errors
/// Returns [`ConnectivityErrorKind::TransientIo`] if `query` doesn't resolve within `timeout`.
pub async fn ask_with_timeout<T>(
    timeout: Duration,
    query: impl std::future::Future<Output = T>,
) -> Result<T, ConnectivityError> {
    tokio::time::timeout(timeout, query)
        .await
        .map_err(|_| ConnectivityError::new(ConnectivityErrorKind::TransientIo).deep())
}

/// Default timeout for the publisher-readiness probe (spec §5).
pub const PUBLISHER_READY_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_then_connected_happy_path() {
        let machine = ClientStateMachine::new();
        machine.open().await.unwrap();
        assert_eq!(machine.state().await, ClientState::Connecting);
        machine.mark_connected().await;
        assert_eq!(machine.state().await, ClientState::Connected);
    }

    #[tokio::test]
    async fn open_rejected_when_already_connecting() {
        let machine = ClientStateMachine::new();
        machine.open().await.unwrap();
        assert!(machine.open().await.is_err());
    }

    #[tokio::test]
    async fn close_waits_for_streams_before_disconnected() {
        let machine = ClientStateMachine::new();
        machine.open().await.unwrap();
        machine.mark_connected().await;

        let (kill_switch, guard) = machine.register_stream().await.unwrap();
        machine.close().await.unwrap();
        assert_eq!(machine.state().await, ClientState::Disconnecting);
        assert!(kill_switch.is_cancelled());

        let machine = Arc::new(machine);
        let join_handle = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.join_termination().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!join_handle.is_finished());
        drop(guard);

        join_handle.await.unwrap();
        machine.finish_closing().await;
        assert_eq!(machine.state().await, ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_completes_future_exactly_once() {
        let machine = ClientStateMachine::new();
        let rx = machine.test().await.unwrap();
        machine.mark_connected().await;
        // A second completion attempt must be a no-op: the oneshot is already consumed.
        machine.mark_failed(ConnectivityError::new(ConnectivityErrorKind::TransientIo)).await;
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(machine.state().await, ClientState::Disconnected);
    }

    #[tokio::test]
    async fn new_generation_has_fresh_kill_switch() {
        let machine = ClientStateMachine::new();
        machine.open().await.unwrap();
        let (first_switch, _guard) = machine.register_stream().await.unwrap();
        machine.mark_failed(ConnectivityError::new(ConnectivityErrorKind::TransientIo)).await;

        machine.open().await.unwrap();
        let (second_switch, _guard2) = machine.register_stream().await.unwrap();
        assert!(!second_switch.is_cancelled());
        first_switch.cancel();
        assert!(!second_switch.is_cancelled());
    }
}
