//! Invalidation listener.
//!
//! ## How It Works
//!
//! ```text
//! Node A: cache.remove("ECM_42.orders")
//!   ↓
//! PUBLISH 1.0Redis.Remove "hostA_Process_000000:ECM_42.orders"
//!   ↓
//! Node A: listener sees its own origin → discarded
//! Node B: listener → local.remove_one("ECM_42.orders")
//! ```
//!
//! The listener only ever touches the local tier. It has no publish path, so
//! applying an inbound message can never trigger another message.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::message::{Channels, InstanceIdentity, InvalidationCommand, InvalidationMessage};
use crate::config::ListenerConfig;
use crate::local::LocalCache;
use crate::store::{InboundMessage, RemoteStore};

/// Connection state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Subscribing,
    Listening,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Applied to the local tier; `evicted` entries were dropped.
    Applied { evicted: usize },
    /// Published by this node, discarded.
    SelfOrigin,
    /// Channel outside our key prefix, ignored.
    ForeignChannel,
    /// Undecodable payload or unknown command, logged and dropped.
    Malformed,
}

pub struct InvalidationBus {
    store: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalCache>,
    identity: InstanceIdentity,
    channels: Channels,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl InvalidationBus {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalCache>,
        identity: InstanceIdentity,
        channels: Channels,
        listener: &ListenerConfig,
    ) -> Self {
        Self {
            store,
            local,
            identity,
            channels,
            initial_backoff: listener.initial_backoff(),
            max_backoff: listener.max_backoff(),
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Decode, filter and apply one inbound message. Never fails.
    pub async fn handle_message(&self, message: &InboundMessage) -> MessageOutcome {
        let Some(command) = self.channels.command(&message.channel) else {
            tracing::debug!(channel = %message.channel, "ignoring message on foreign channel");
            return MessageOutcome::ForeignChannel;
        };

        let decoded = match InvalidationMessage::decode(&message.channel, command, &message.payload)
        {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(error = %e, payload = %message.payload, "dropping invalidation message");
                return MessageOutcome::Malformed;
            }
        };

        if decoded.is_from(&self.identity) {
            tracing::debug!(channel = %message.channel, "ignoring own invalidation message");
            return MessageOutcome::SelfOrigin;
        }

        let evicted = match decoded.command() {
            InvalidationCommand::Clear { kind, data } => {
                self.local.remove_matching(kind, data).await
            }
            InvalidationCommand::Remove { key } => usize::from(self.local.remove_one(key).await),
        };

        tracing::debug!(
            origin = %decoded.origin(),
            channel = %message.channel,
            evicted,
            "applied remote invalidation"
        );
        MessageOutcome::Applied { evicted }
    }

    /// Start the listener task. It stops when `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> BusHandle {
        let (state_tx, state_rx) = watch::channel(BusState::Disconnected);
        let subscriptions = Arc::new(AtomicU64::new(0));
        let token = shutdown.clone();
        let counter = subscriptions.clone();
        let task = tokio::spawn(async move {
            self.run(state_tx, counter, token).await;
        });

        BusHandle {
            state: state_rx,
            subscriptions,
            shutdown,
            task,
        }
    }

    /// Subscribe, process messages in arrival order, and reconnect with
    /// exponential backoff whenever the subscription fails or ends.
    async fn run(
        self,
        state: watch::Sender<BusState>,
        subscriptions: Arc<AtomicU64>,
        shutdown: CancellationToken,
    ) {
        let mut backoff = self.initial_backoff;

        loop {
            state.send_replace(BusState::Subscribing);

            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.store.psubscribe(self.channels.pattern()) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    subscriptions.fetch_add(1, Ordering::SeqCst);
                    state.send_replace(BusState::Listening);
                    backoff = self.initial_backoff;
                    tracing::info!(
                        pattern = %self.channels.pattern(),
                        instance = %self.identity,
                        "Listening for cache invalidation messages"
                    );

                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                state.send_replace(BusState::Disconnected);
                                tracing::info!("Cache invalidation listener stopped");
                                return;
                            }
                            next = stream.next() => match next {
                                Some(message) => {
                                    self.handle_message(&message).await;
                                }
                                None => break,
                            },
                        }
                    }

                    state.send_replace(BusState::Disconnected);
                    tracing::error!(
                        backoff_ms = backoff.as_millis() as u64,
                        "Invalidation subscription closed, reconnecting..."
                    );
                }
                Err(e) => {
                    state.send_replace(BusState::Disconnected);
                    tracing::error!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Cache invalidation listener error, reconnecting..."
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            // Exponential backoff with max limit
            backoff = (backoff * 2).min(self.max_backoff);
        }

        state.send_replace(BusState::Disconnected);
        tracing::info!("Cache invalidation listener stopped");
    }
}

/// Handle to a running listener.
pub struct BusHandle {
    state: watch::Receiver<BusState>,
    subscriptions: Arc<AtomicU64>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl BusHandle {
    pub fn state(&self) -> BusState {
        *self.state.borrow()
    }

    /// Number of successful subscriptions so far; grows by one per reconnect.
    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Receiver for observing state transitions.
    pub fn watch_state(&self) -> watch::Receiver<BusState> {
        self.state.clone()
    }

    /// Wait until the listener reaches `target`. Returns `false` if the
    /// listener task ended first.
    pub async fn wait_for(&self, target: BusState) -> bool {
        let mut state = self.state.clone();
        state.wait_for(|current| *current == target).await.is_ok()
    }

    pub async fn wait_listening(&self) -> bool {
        self.wait_for(BusState::Listening).await
    }

    /// Stop the listener and wait for the task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "invalidation listener task failed");
        }
    }
}
