//! In-memory store adapter for tests and embedded use.
//!
//! Mirrors the durable adapter's contract exactly: conflicts are detected
//! by set-intersection of the incoming batch's sequence numbers with the
//! sequences already stored for the aggregate, and commit-time projections
//! run under the same write lock that admits the batch, so a projection
//! failure leaves no trace of the attempted append.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::clock::AggregateId;
use crate::event::{RecordedEvent, Snapshot};
use crate::store::{EventStore, Projection, StoreError, validate_batch};

/// In-memory [`EventStore`] implementation.
///
/// Clones share the underlying storage. The global write lock makes
/// `append` linearizable across all aggregates, which is stronger than
/// the per-aggregate requirement of the contract.
#[derive(Clone, Default)]
pub struct MemoryStore {
    events: Arc<RwLock<HashMap<AggregateId, Vec<RecordedEvent>>>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    /// Stored sequences for one aggregate, ascending.
    pub async fn sequences(&self, id: AggregateId) -> Vec<u64> {
        self.events
            .read()
            .await
            .get(&id)
            .map(|stream| stream.iter().map(|e| e.sequence).collect())
            .unwrap_or_default()
    }

    /// Drop all events and snapshots.
    pub async fn clear(&self) {
        self.events.write().await.clear();
        self.snapshots.write().await.clear();
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(
        &self,
        events: Vec<RecordedEvent>,
        projections: &[Arc<dyn Projection>],
    ) -> Result<(), StoreError> {
        validate_batch(&events)?;
        let id = events[0].aggregate_id;

        let mut store = self.events.write().await;
        let stream = store.entry(id).or_default();

        let stored: HashSet<u64> = stream.iter().map(|e| e.sequence).collect();
        if events.iter().any(|e| stored.contains(&e.sequence)) {
            return Err(StoreError::Conflict);
        }

        // Projections run inside the commit: a failure aborts the append
        // with nothing stored.
        for event in &events {
            for projection in projections {
                projection
                    .project(event)
                    .map_err(|e| StoreError::Projection {
                        name: projection.name().to_string(),
                        message: e.message,
                    })?;
            }
        }

        stream.extend(events);
        stream.sort_by_key(|e| e.sequence);
        Ok(())
    }

    async fn events(
        &self,
        id: AggregateId,
        after: u64,
        up_to: u64,
    ) -> Result<Vec<RecordedEvent>, StoreError> {
        let store = self.events.read().await;
        Ok(store
            .get(&id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence > after && e.sequence <= up_to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn snapshot(
        &self,
        id: AggregateId,
        after: u64,
        up_to: u64,
    ) -> Result<Option<Snapshot>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(&id)
            .filter(|s| s.sequence > after && s.sequence <= up_to)
            .cloned())
    }

    async fn commit_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(stored) if stored.sequence >= snapshot.sequence => Ok(()),
            _ => {
                snapshots.insert(snapshot.aggregate_id, snapshot);
                Ok(())
            }
        }
    }
}
