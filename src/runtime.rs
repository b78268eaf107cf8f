//! Aggregate runtime: hydration, command evaluation, the optimistic
//! commit path, and snapshot capture.
//!
//! These operations always run on an actor's turn, so they may assume
//! exclusive ownership of the [`Aggregate`] they mutate. State is only
//! updated after a successful append; a caught handler fault therefore
//! leaves the aggregate exactly as it was.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::aggregate::{Aggregate, RootConfig};
use crate::clock::{AggregateId, HybridClock};
use crate::command::Command;
use crate::error::{Error, FaultKind};
use crate::event::{RecordedEvent, Snapshot};
use crate::registry::HandlerRegistry;
use crate::store::{EventStore, StoreError};

/// Backoff policy applied between conflict retries.
///
/// The retry loop itself is unbounded; the backoff only paces it. The
/// delay starts at `base` and doubles up to `max` on each consecutive
/// conflict.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling for the doubled delay.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(10),
            max: Duration::from_secs(1),
        }
    }
}

/// Extract a readable message from a caught panic payload.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Map a store error onto the caller-visible error kinds.
///
/// `Conflict` is never lifted -- the commit loop consumes it.
fn lift_store_error(error: StoreError) -> Error {
    match error {
        StoreError::Projection { name, message } => Error::HandlerFault {
            kind: FaultKind::Projection,
            trace: format!("{name}: {message}"),
        },
        other => Error::StoreUnavailable(other.to_string()),
    }
}

/// Shared collaborators for one aggregate root's runtime operations.
///
/// Owned by each actor; cheap to clone (everything is `Arc`-backed).
#[derive(Clone)]
pub(crate) struct Runtime {
    pub(crate) root: Arc<RootConfig>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) clock: HybridClock,
    pub(crate) retry: RetryPolicy,
}

impl Runtime {
    /// Fold one committed event into the aggregate via its event handler.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidHandler`] -- no handler for the event's type tag.
    /// * [`Error::HandlerFault`] -- the handler panicked; state unchanged.
    fn apply_event(&self, aggregate: &mut Aggregate, event: &RecordedEvent) -> Result<(), Error> {
        let handler = self
            .registry
            .resolve_event(&self.root.event_prefix, &event.event_type)?;

        let state = aggregate.state.clone();
        let next = catch_unwind(AssertUnwindSafe(|| handler.apply(state, event)))
            .map_err(|payload| Error::HandlerFault {
                kind: FaultKind::Panic,
                trace: panic_message(payload),
            })?;

        aggregate.state = next;
        aggregate.sequence = event.sequence;
        Ok(())
    }

    /// Bring the aggregate up to date from the store, bounded by `up_to`.
    ///
    /// The best snapshot in `(aggregate.sequence, up_to]` replaces
    /// `(state, sequence)` first; trailing events are then folded on top.
    /// Snapshots are an optimization only -- events are authoritative
    /// past the snapshot point. Idempotent.
    pub(crate) async fn hydrate(
        &self,
        aggregate: &mut Aggregate,
        up_to: u64,
    ) -> Result<(), Error> {
        if let Some(snapshot) = self
            .store
            .snapshot(aggregate.id, aggregate.sequence, up_to)
            .await
            .map_err(lift_store_error)?
        {
            let state = (self.root.behavior.use_snapshot)(aggregate, &snapshot);
            aggregate.state = state;
            aggregate.sequence = snapshot.sequence;
            tracing::debug!(
                aggregate_id = %aggregate.id,
                sequence = snapshot.sequence,
                "restored from snapshot"
            );
        }

        let events = self
            .store
            .events(aggregate.id, aggregate.sequence, up_to)
            .await
            .map_err(lift_store_error)?;
        for event in &events {
            self.apply_event(aggregate, event)?;
        }
        Ok(())
    }

    /// Reconstruct the state at `sequence == up_to` from scratch.
    ///
    /// Starts from a fresh initial state, uses any snapshot bounded by
    /// `up_to`, and folds events up to it. Never touches the live
    /// aggregate; `up_to = 0` yields the initial state.
    pub(crate) async fn replay_at(&self, id: AggregateId, up_to: u64) -> Result<Value, Error> {
        let mut fresh = Aggregate::new(id, &self.root);
        if up_to > 0 {
            self.hydrate(&mut fresh, up_to).await?;
        }
        Ok(fresh.state)
    }

    /// Evaluate one command: hydrate, run the command handler, commit the
    /// produced events atomically with the root's projections, and fold
    /// them into state.
    ///
    /// On a concurrency conflict the aggregate is re-hydrated and the
    /// same command re-evaluated, without bound, pacing retries with the
    /// configured backoff. Command handlers must therefore be
    /// deterministic and side-effect-free.
    pub(crate) async fn eval_command(
        &self,
        aggregate: &mut Aggregate,
        command: &Command,
    ) -> Result<(), Error> {
        let mut backoff = self.retry.base;

        loop {
            self.hydrate(aggregate, self.store.max_sequence()).await?;

            let handler = self
                .registry
                .resolve_command(&self.root.command_prefix, &command.kind)?;

            let proposed = match catch_unwind(AssertUnwindSafe(|| {
                handler.eval(aggregate, command)
            })) {
                Ok(Ok(events)) => events,
                Ok(Err(e)) => {
                    return Err(Error::HandlerFault {
                        kind: FaultKind::Eval,
                        trace: e.to_string(),
                    });
                }
                Err(payload) => {
                    return Err(Error::HandlerFault {
                        kind: FaultKind::Panic,
                        trace: panic_message(payload),
                    });
                }
            };

            // A no-op command: nothing to commit, nothing changes.
            if proposed.is_empty() {
                return Ok(());
            }

            // Prepare: assign dense sequences and HLC timestamps in the
            // handler's emission order. Persisted order must match.
            let mut batch = Vec::with_capacity(proposed.len());
            for (offset, event) in proposed.into_iter().enumerate() {
                let timestamp = self
                    .clock
                    .now()
                    .map_err(|e| Error::ClockFailure(e.to_string()))?;
                batch.push(RecordedEvent {
                    aggregate_id: aggregate.id,
                    sequence: aggregate.sequence + offset as u64 + 1,
                    event_type: event.event_type,
                    data: event.data,
                    timestamp,
                });
            }

            match self
                .store
                .append(batch.clone(), &self.root.projections)
                .await
            {
                Ok(()) => {
                    for event in &batch {
                        self.apply_event(aggregate, event)?;
                    }
                    tracing::debug!(
                        aggregate_id = %aggregate.id,
                        kind = %command.kind,
                        count = batch.len(),
                        sequence = aggregate.sequence,
                        "events committed"
                    );
                    return Ok(());
                }
                Err(StoreError::Conflict) => {
                    tracing::debug!(
                        aggregate_id = %aggregate.id,
                        kind = %command.kind,
                        backoff_ms = backoff.as_millis() as u64,
                        "append conflict; re-hydrating and retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry.max);
                }
                Err(other) => return Err(lift_store_error(other)),
            }
        }
    }

    /// Capture a snapshot of the current state at the current sequence.
    pub(crate) async fn capture_snapshot(&self, aggregate: &Aggregate) -> Result<Snapshot, Error> {
        let snapshot = Snapshot {
            aggregate_id: aggregate.id,
            sequence: aggregate.sequence,
            body: (self.root.behavior.prepare_snapshot)(&aggregate.state),
        };
        self.store
            .commit_snapshot(snapshot.clone())
            .await
            .map_err(lift_store_error)?;
        tracing::debug!(
            aggregate_id = %aggregate.id,
            sequence = snapshot.sequence,
            "snapshot committed"
        );
        Ok(snapshot)
    }

    /// Deliver an extension message to the root's `handle_call` callback.
    pub(crate) fn call(&self, aggregate: &Aggregate, msg: Value) -> Result<Value, Error> {
        catch_unwind(AssertUnwindSafe(|| {
            (self.root.behavior.handle_call)(aggregate, msg)
        }))
        .map_err(|payload| Error::HandlerFault {
            kind: FaultKind::Panic,
            trace: panic_message(payload),
        })
    }
}
