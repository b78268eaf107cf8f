//! Event and snapshot data types shared by the runtime and the store
//! adapters.
//!
//! A command handler emits [`ProposedEvent`]s; the runtime assigns each a
//! sequence number and an HLC timestamp, turning it into a
//! [`RecordedEvent`] before the batch is appended. Recorded events are
//! immutable once committed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{AggregateId, HlcTimestamp};

/// An event as emitted by a command handler, before sequencing.
///
/// The `event_type` is a dotted lowercase tag (e.g. `account.deposited`)
/// used to locate the event handler that folds it into state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEvent {
    /// Dotted lowercase type tag.
    pub event_type: String,
    /// Opaque JSON payload.
    pub data: Value,
}

impl ProposedEvent {
    /// Build a proposed event from a type tag and payload.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// An immutable committed event.
///
/// Sequences are dense, contiguous, and strictly increasing per aggregate,
/// starting at 1. Timestamps are strictly increasing with sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Position in the aggregate's stream, starting at 1.
    pub sequence: u64,
    /// Dotted lowercase type tag.
    pub event_type: String,
    /// Opaque JSON payload.
    pub data: Value,
    /// HLC timestamp assigned when the event was prepared for commit.
    pub timestamp: HlcTimestamp,
}

/// A cached view of an aggregate's state at some sequence.
///
/// At most one snapshot per aggregate is retained; a stored snapshot is
/// replaced only by one with a higher sequence. Snapshots are an
/// optimization, never a source of truth -- events remain authoritative
/// past the snapshot point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,
    /// The highest event sequence folded into `body`.
    pub sequence: u64,
    /// Application-defined serializable body, produced by
    /// `prepare_snapshot`.
    pub body: Value,
}
