// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The publisher worker (spec §4.7): one actor owning the connection's address -> handle map,
//! mutated only from its own message-processing context. Handle creation is serialized per
//! address; a closed handle is recreated after an exponential backoff that doubles per
//! consecutive failure, with additional closure notifications ignored while backoff is running.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ConnectivityError, ConnectivityErrorKind};
use crate::model::{ExternalMessage, ResolvedAddress};

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// A live connection to one resolved address, capable of sending one outbound message.
#[async_trait]
pub trait PublishHandle: Send + Sync {
    /// Send `message`. A `TransientIo` error is treated as the handle having closed.
    async fn send(&self, message: &ExternalMessage) -> Result<(), ConnectivityError>;
}

/// Creates protocol-specific [`PublishHandle`]s. Implemented per protocol (spec §1: thin
/// adapters over mature client libraries).
#[async_trait]
pub trait HandleFactory: Send + Sync {
    /// Open a new handle to `address`.
    async fn create(&self, address: &str) -> Result<Arc<dyn PublishHandle>, ConnectivityError>;
}

/// A request processed by the publisher worker's single message loop (spec §5: "each worker
/// processes one message at a time against private state").
enum Command {
    Publish {
        address: ResolvedAddress,
        message: ExternalMessage,
        respond_to: oneshot::Sender<Result<(), ConnectivityError>>,
    },
    HandleClosed {
        address: String,
    },
    RecreateHandle {
        address: String,
    },
}

/// A handle to a running publisher worker.
#[derive(Clone)]
pub struct PublisherHandle {
    commands: mpsc::Sender<Command>,
}

impl PublisherHandle {
    /// Publish `message` to `address`, obtaining or creating the handle as needed.
    ///
    /// # Errors
    /// Returns the send error, or a [`ConnectivityErrorKind::TransientIo`] error if the worker
    /// has already shut down.
    pub async fn publish(
        &self,
        address: ResolvedAddress,
        message: ExternalMessage,
    ) -> Result<(), ConnectivityError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                address,
                message,
                respond_to,
            })
            .await
            .map_err(|_| ConnectivityError::new(ConnectivityErrorKind::TransientIo))?;
        response
            .await
            .map_err(|_| ConnectivityError::new(ConnectivityErrorKind::TransientIo))?
    }

    /// Report that the handle for `address` closed or failed out-of-band (e.g. a protocol
    /// library's producer-closed event).
    pub async fn notify_handle_closed(&self, address: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::HandleClosed {
                address: address.into(),
            })
            .await;
    }
}

struct State {
    factory: Arc<dyn HandleFactory>,
    handles: HashMap<String, Arc<dyn PublishHandle>>,
    consecutive_failures: HashMap<String, u32>,
    backing_off: HashSet<String>,
}

impl State {
    async fn ensure_handle(
        &mut self,
        address: &str,
    ) -> Result<Arc<dyn PublishHandle>, ConnectivityError> {
        if let Some(handle) = self.handles.get(address) {
            return Ok(handle.clone());
        }
        let handle = self.factory.create(address).await?;
        self.handles.insert(address.to_string(), handle.clone());
        Ok(handle)
    }
}

fn backoff_delay(consecutive_failures: u32) -> Duration {
    BASE_BACKOFF
        .saturating_mul(1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX))
        .min(MAX_BACKOFF)
}

/// Run the publisher worker's message loop until `commands` closes (spec §4.7, §5). `self_tx`
/// is a sender back to this same loop, used to re-enqueue a [`Command::RecreateHandle`] once a
/// closed handle's backoff elapses.
async fn run(
    factory: Arc<dyn HandleFactory>,
    self_tx: mpsc::Sender<Command>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut state = State {
        factory,
        handles: HashMap::new(),
        consecutive_failures: HashMap::new(),
        backing_off: HashSet::new(),
    };

    while let Some(command) = commands.recv().await {
        match command {
            Command::Publish {
                address,
                message,
                respond_to,
            } => {
                let result = match state.ensure_handle(&address.resolved).await {
                    Ok(handle) => handle.send(&message).await,
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }
            Command::HandleClosed { address } => {
                if state.backing_off.contains(&address) {
                    continue;
                }
                state.handles.remove(&address);
                state.backing_off.insert(address.clone());
                let failures = state.consecutive_failures.entry(address.clone()).or_insert(0);
                let delay = backoff_delay(*failures);
                *failures += 1;
                warn!("publish handle for '{address}' closed, retrying in {delay:?}");

                let retry_tx = self_tx.clone();
                let retry_address = address.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = retry_tx
                        .send(Command::RecreateHandle {
                            address: retry_address,
                        })
                        .await;
                });
            }
            Command::RecreateHandle { address } => {
                state.backing_off.remove(&address);
                if let Err(e) = state.ensure_handle(&address).await {
                    warn!("failed to recreate publish handle for '{address}': {e}");
                }
            }
        }
    }
}

/// Spawn the publisher worker, returning a handle to it.
#[must_use]
pub fn spawn(factory: Arc<dyn HandleFactory>, buffer: usize) -> PublisherHandle {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(run(factory, tx.clone(), rx));
    PublisherHandle { commands: tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{advance, Duration as TokioDuration};

    struct CountingHandle;

    #[async_trait]
    impl PublishHandle for CountingHandle {
        async fn send(&self, _message: &ExternalMessage) -> Result<(), ConnectivityError> {
            Ok(())
        }
    }

    struct CountingFactory {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HandleFactory for CountingFactory {
        async fn create(&self, _address: &str) -> Result<Arc<dyn PublishHandle>, ConnectivityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingHandle))
        }
    }

    fn sample_message() -> ExternalMessage {
        ExternalMessage {
            payload: Vec::new(),
            text: None,
            content_type: None,
            headers: HashMap::new(),
            source_address: String::new(),
            authorization_context: Vec::new(),
            enforcement_input: None,
            payload_mapping: Vec::new(),
            is_response: false,
        }
    }

    #[test]
    fn backoff_doubles_per_consecutive_failure() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn recreates_on_each_closure_spaced_past_backoff() {
        // spec §8 scenario 6, first half: closures 1s apart, each after backoff clears.
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(CountingFactory { calls: calls.clone() });
        let mut state = State {
            factory,
            handles: HashMap::new(),
            consecutive_failures: HashMap::new(),
            backing_off: HashSet::new(),
        };

        state.ensure_handle("addr").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for _ in 0..3 {
            state.handles.remove("addr");
            let failures = state
                .consecutive_failures
                .entry("addr".to_string())
                .or_insert(0);
            let delay = backoff_delay(*failures);
            *failures += 1;
            advance(delay).await;
            state.ensure_handle("addr").await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_closures_during_backoff() {
        // spec §8 scenario 6, second half: closures faster than backoff only recreate once.
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(CountingFactory { calls: calls.clone() });
        let handle = spawn(factory, 16);

        handle
            .publish(
                ResolvedAddress {
                    resolved: "addr".to_string(),
                    original: "addr".to_string(),
                },
                sample_message(),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.notify_handle_closed("addr").await;
        handle.notify_handle_closed("addr").await;
        handle.notify_handle_closed("addr").await;
        tokio::task::yield_now().await;

        advance(TokioDuration::from_secs(10)).await;
        tokio::task::yield_now().await;

        // only the first closure schedules a recreation; the other two arrive while backing off
        // and are dropped (spec §4.7: "additional closure notifications for same handle ignored").
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
