//! Command type routed to aggregate actors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::AggregateId;

/// A request to change an aggregate's state.
///
/// Commands are evaluated, never stored. The `kind` is a dotted lowercase
/// type tag (e.g. `account.deposit`) used to locate the command handler
/// under the aggregate root's command prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// The aggregate this command targets.
    pub aggregate_id: AggregateId,
    /// Dotted lowercase type tag.
    pub kind: String,
    /// Opaque JSON payload.
    pub data: Value,
}

impl Command {
    /// Build a command from a target aggregate, type tag, and payload.
    pub fn new(aggregate_id: AggregateId, kind: impl Into<String>, data: Value) -> Self {
        Self {
            aggregate_id,
            kind: kind.into(),
            data,
        }
    }
}
