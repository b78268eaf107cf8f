//! Store adapter contract: append-only event log plus a
//! single-row-per-aggregate snapshot store with optimistic concurrency.
//!
//! Two implementations ship with the crate: [`MemoryStore`](crate::MemoryStore)
//! for tests and embedded use, and [`JournalStore`](crate::JournalStore) for
//! durable JSONL logs. Adapters must make `append` linearizable per
//! aggregate id; everything else follows from that.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::AggregateId;
use crate::event::{RecordedEvent, Snapshot};

/// Error raised by a commit-time projection.
///
/// A projection failure aborts the whole append: no event rows and no
/// other projection side-effects survive.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProjectionError {
    /// Human-readable failure description.
    pub message: String,
}

impl ProjectionError {
    /// Build a projection error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A side-effect invoked atomically with an event append, used to
/// maintain read models.
///
/// The store calls [`project`](Projection::project) for each event in the
/// batch, inside the commit. Implementations use interior mutability for
/// their read model and must be prepared to see the same event again if a
/// later projection in the same batch fails and the commit is retried.
pub trait Projection: Send + Sync {
    /// Stable name used in logs and error reports.
    fn name(&self) -> &str;

    /// Apply one committed event to the read model.
    ///
    /// # Errors
    ///
    /// Returning an error fails the commit.
    fn project(&self, event: &RecordedEvent) -> Result<(), ProjectionError>;
}

/// Errors surfaced by store adapters.
///
/// `Conflict` is recovered internally by the runtime's retry loop and is
/// never visible to callers of aggregate operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An event in the batch collides with an existing
    /// `(aggregate_id, sequence)` row.
    #[error("optimistic concurrency conflict")]
    Conflict,

    /// The batch violates the append preconditions (empty, mixed
    /// aggregates, or non-contiguous sequences).
    #[error("invalid event batch: {0}")]
    InvalidBatch(String),

    /// A commit-time projection rejected the append.
    #[error("projection '{name}' failed: {message}")]
    Projection {
        /// Name of the failing projection.
        name: String,
        /// Failure description from the projection.
        message: String,
    },

    /// The underlying medium could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Contract for the durable event/snapshot store.
///
/// All operations are serializable; `append` is linearizable per
/// aggregate id.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch of events atomically, running every projection's
    /// side-effect inside the same commit.
    ///
    /// The batch must target a single aggregate with ascending, gap-free
    /// sequences in emitted order.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Conflict`] -- some `(aggregate_id, sequence)`
    ///   already exists.
    /// * [`StoreError::Projection`] -- a projection failed; nothing was
    ///   committed.
    /// * [`StoreError::InvalidBatch`] -- precondition violation.
    async fn append(
        &self,
        events: Vec<RecordedEvent>,
        projections: &[Arc<dyn Projection>],
    ) -> Result<(), StoreError>;

    /// Events with `after < sequence <= up_to`, ordered by sequence
    /// ascending.
    async fn events(
        &self,
        id: AggregateId,
        after: u64,
        up_to: u64,
    ) -> Result<Vec<RecordedEvent>, StoreError>;

    /// The retained snapshot if one exists with
    /// `after < sequence <= up_to`.
    async fn snapshot(
        &self,
        id: AggregateId,
        after: u64,
        up_to: u64,
    ) -> Result<Option<Snapshot>, StoreError>;

    /// Persist a snapshot. Idempotent: a snapshot with a sequence at or
    /// below the stored one is a no-op.
    async fn commit_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError>;

    /// Ceiling sequence used as the default upper bound for reads.
    fn max_sequence(&self) -> u64 {
        u64::MAX
    }
}

/// Check the append preconditions shared by adapter implementations.
pub(crate) fn validate_batch(events: &[RecordedEvent]) -> Result<(), StoreError> {
    let first = events
        .first()
        .ok_or_else(|| StoreError::InvalidBatch("empty event batch".to_string()))?;

    for pair in events.windows(2) {
        if pair[1].aggregate_id != first.aggregate_id {
            return Err(StoreError::InvalidBatch(
                "all events must target one aggregate".to_string(),
            ));
        }
        if pair[1].sequence != pair[0].sequence + 1 {
            return Err(StoreError::InvalidBatch(format!(
                "sequences must be contiguous: {} then {}",
                pair[0].sequence, pair[1].sequence
            )));
        }
    }
    Ok(())
}
