//! Actor loop that owns an aggregate and serializes its operations.
//!
//! One tokio task per live aggregate id. The task exclusively owns the
//! [`Aggregate`] value and processes messages from an `mpsc` channel one
//! at a time, so at most one command evaluation or hydration is ever in
//! flight for a given id. Operations requested while a turn is running
//! queue up in submission order.
//!
//! Public API: [`Handle`] (cloneable async handle). Actors are spawned by
//! the [`Directory`](crate::Directory), hydrate once on startup, and shut
//! down after `idle_timeout` without messages; the directory transparently
//! respawns them on the next request (temporary restart policy).

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::aggregate::Aggregate;
use crate::clock::AggregateId;
use crate::command::Command;
use crate::error::Error;
use crate::event::Snapshot;
use crate::runtime::Runtime;

/// Capacity of an actor's inbound queue.
const MAILBOX_CAPACITY: usize = 32;

/// Per-actor configuration, resolved by the directory builder.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActorConfig {
    /// How long the actor waits for a message before shutting down.
    pub idle_timeout: Duration,
    /// Deadline applied to every operation crossing the actor boundary.
    pub call_timeout: Duration,
    /// Capture a snapshot automatically once this many events have been
    /// committed since the last capture. `None` disables the cadence.
    pub snapshot_every: Option<u64>,
}

/// Messages sent from [`Handle`] to the actor loop.
///
/// Each variant carries a `oneshot::Sender` for the actor to reply on
/// once the operation completes.
pub(crate) enum ActorMessage {
    /// Run the full evaluation pipeline for one command.
    Evaluate {
        command: Command,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// Return the in-memory state without touching the store.
    Get {
        reply: oneshot::Sender<Result<Value, Error>>,
    },
    /// Hydrate from the store, then return the state.
    Fetch {
        reply: oneshot::Sender<Result<Value, Error>>,
    },
    /// Reconstruct the state at a given sequence without mutating the
    /// actor's aggregate.
    Replay {
        up_to: u64,
        reply: oneshot::Sender<Result<Value, Error>>,
    },
    /// Capture and commit a snapshot at the current sequence.
    Snapshot {
        reply: oneshot::Sender<Result<Snapshot, Error>>,
    },
    /// Deliver an extension message to the root's `handle_call`.
    Call {
        msg: Value,
        reply: oneshot::Sender<Result<Value, Error>>,
    },
    /// Gracefully shut down the actor loop.
    #[allow(dead_code)] // Constructed only in tests.
    Shutdown,
}

/// Runs one aggregate's actor loop.
///
/// Hydrates once on startup, then processes messages sequentially until
/// the channel closes, a `Shutdown` message arrives, or the idle timeout
/// elapses. A failed startup hydration terminates the actor; the
/// directory will start a fresh one on the next request.
pub(crate) async fn run_actor(
    mut aggregate: Aggregate,
    runtime: Runtime,
    mut rx: mpsc::Receiver<ActorMessage>,
    config: ActorConfig,
) {
    let up_to = runtime.store.max_sequence();
    if let Err(error) = runtime.hydrate(&mut aggregate, up_to).await {
        tracing::error!(
            aggregate_id = %aggregate.id,
            error = %error,
            "startup hydration failed; actor terminating"
        );
        return;
    }

    // Events committed since the last snapshot capture, for the
    // automatic cadence.
    let mut since_snapshot: u64 = 0;

    loop {
        let msg = tokio::time::timeout(config.idle_timeout, rx.recv()).await;

        match msg {
            Ok(Some(msg)) => match msg {
                ActorMessage::Evaluate { command, reply } => {
                    let result = if command.aggregate_id != aggregate.id {
                        Err(Error::InvalidCommand(format!(
                            "command targets {} but this actor owns {}",
                            command.aggregate_id, aggregate.id
                        )))
                    } else {
                        let before = aggregate.sequence;
                        let result = runtime.eval_command(&mut aggregate, &command).await;
                        if result.is_ok() {
                            since_snapshot += aggregate.sequence - before;
                        }
                        result
                    };
                    // If the receiver was dropped (e.g. the caller's
                    // deadline expired), discard the result.
                    let _ = reply.send(result);

                    if let Some(cadence) = config.snapshot_every
                        && since_snapshot >= cadence
                    {
                        match runtime.capture_snapshot(&aggregate).await {
                            Ok(_) => since_snapshot = 0,
                            Err(error) => tracing::warn!(
                                aggregate_id = %aggregate.id,
                                error = %error,
                                "automatic snapshot failed"
                            ),
                        }
                    }
                }

                ActorMessage::Get { reply } => {
                    let _ = reply.send(Ok(aggregate.state.clone()));
                }

                ActorMessage::Fetch { reply } => {
                    let up_to = runtime.store.max_sequence();
                    let result = runtime
                        .hydrate(&mut aggregate, up_to)
                        .await
                        .map(|()| aggregate.state.clone());
                    let _ = reply.send(result);
                }

                ActorMessage::Replay { up_to, reply } => {
                    let result = runtime.replay_at(aggregate.id, up_to).await;
                    let _ = reply.send(result);
                }

                ActorMessage::Snapshot { reply } => {
                    let result = runtime.capture_snapshot(&aggregate).await;
                    if result.is_ok() {
                        since_snapshot = 0;
                    }
                    let _ = reply.send(result);
                }

                ActorMessage::Call { msg, reply } => {
                    let _ = reply.send(runtime.call(&aggregate, msg));
                }

                ActorMessage::Shutdown => break,
            },
            // Channel closed: all senders dropped.
            Ok(None) => break,
            // Idle timeout elapsed with no messages.
            Err(_elapsed) => {
                tracing::info!(
                    aggregate_id = %aggregate.id,
                    "actor idle, shutting down"
                );
                break;
            }
        }
    }
}

/// Async handle to a running aggregate actor.
///
/// Lightweight, cloneable, and `Send + Sync`. Every operation is bounded
/// by the configured call timeout; expiry returns [`Error::Timeout`] to
/// the caller without cancelling the actor's in-flight turn.
#[derive(Debug, Clone)]
pub struct Handle {
    id: AggregateId,
    sender: mpsc::Sender<ActorMessage>,
    call_timeout: Duration,
}

impl Handle {
    /// The aggregate id this handle addresses.
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Check whether the actor backing this handle is still running.
    ///
    /// Returns `false` after idle eviction or shutdown. The directory
    /// uses this to replace stale handles on the next `whereis`.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Enqueue one message and await its reply under the call timeout.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, Error>>) -> ActorMessage,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        let exchange = async {
            self.sender
                .send(build(tx))
                .await
                .map_err(|_| Error::ActorGone)?;
            rx.await.map_err(|_| Error::ActorGone)?
        };
        match tokio::time::timeout(self.call_timeout, exchange).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::Timeout(self.call_timeout)),
        }
    }

    /// Evaluate a command through the full pipeline: hydrate, eval,
    /// commit with retry, fold. The reply reflects the commit outcome.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCommand`] when the command targets a different
    /// aggregate; otherwise any pipeline error from §evaluation --
    /// `InvalidHandler`, `HandlerFault`, `StoreUnavailable`,
    /// `ClockFailure` -- plus `Timeout` and `ActorGone` from the actor
    /// boundary.
    pub async fn evaluate(&self, command: Command) -> Result<(), Error> {
        self.request(|reply| ActorMessage::Evaluate { command, reply })
            .await
    }

    /// Return the current in-memory state without touching the store.
    ///
    /// The state may be stale with respect to writers on other nodes;
    /// use [`fetch`](Handle::fetch) to catch up first.
    pub async fn get(&self) -> Result<Value, Error> {
        self.request(|reply| ActorMessage::Get { reply }).await
    }

    /// Hydrate from the store, then return the state.
    pub async fn fetch(&self) -> Result<Value, Error> {
        self.request(|reply| ActorMessage::Fetch { reply }).await
    }

    /// Reconstruct what the state was at `sequence == up_to`.
    ///
    /// Does not mutate the actor's current state; `replay(0)` returns
    /// the initial state.
    pub async fn replay(&self, up_to: u64) -> Result<Value, Error> {
        self.request(|reply| ActorMessage::Replay { up_to, reply })
            .await
    }

    /// Capture a snapshot of the current state and commit it.
    pub async fn snapshot(&self) -> Result<Snapshot, Error> {
        self.request(|reply| ActorMessage::Snapshot { reply }).await
    }

    /// Deliver an extension message to the aggregate in its serialized
    /// turn.
    pub async fn call(&self, msg: Value) -> Result<Value, Error> {
        self.request(|reply| ActorMessage::Call { msg, reply }).await
    }

    /// Send a graceful shutdown request, for tests.
    #[cfg(test)]
    pub(crate) async fn shutdown(&self) {
        let _ = self.sender.send(ActorMessage::Shutdown).await;
    }
}

/// Spawn a new actor task for `id` and return its handle.
pub(crate) fn spawn_actor(id: AggregateId, runtime: Runtime, config: ActorConfig) -> Handle {
    let aggregate = Aggregate::new(id, &runtime.root);
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

    tracing::debug!(aggregate_id = %id, root = %runtime.root.name, "spawning actor");
    tokio::spawn(run_actor(aggregate, runtime, rx, config));

    Handle {
        id,
        sender: tx,
        call_timeout: config.call_timeout,
    }
}
