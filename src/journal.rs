//! Durable store adapter backed by append-only JSONL logs.
//!
//! Each aggregate's events live in `<base>/streams/<id>.jsonl`, one
//! JSON-encoded event per line, appended in commit order. The retained
//! snapshot lives in `<base>/snapshots/<id>.json` and is written with a
//! temp-rename so readers never observe a partial file.
//!
//! ```text
//! <base_dir>/
//!     streams/
//!         <aggregate_id>.jsonl
//!     snapshots/
//!         <aggregate_id>.json
//! ```
//!
//! A store-wide async mutex serializes appends, which satisfies the
//! per-aggregate linearizability requirement; known sequence sets are
//! cached in memory and recovered by scanning the log on first touch.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::clock::AggregateId;
use crate::event::{RecordedEvent, Snapshot};
use crate::store::{EventStore, Projection, StoreError, validate_batch};

/// Directory layout for a journal store.
///
/// Cheap to clone (wraps a single `PathBuf`).
#[derive(Debug, Clone)]
pub struct JournalLayout {
    base_dir: PathBuf,
}

impl JournalLayout {
    /// Create a layout rooted at the given base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the root directory of this layout.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns `<base_dir>/streams`.
    pub fn streams_dir(&self) -> PathBuf {
        self.base_dir.join("streams")
    }

    /// Returns `<base_dir>/snapshots`.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.base_dir.join("snapshots")
    }

    /// Event log path for one aggregate.
    pub fn stream_path(&self, id: AggregateId) -> PathBuf {
        self.streams_dir().join(format!("{id}.jsonl"))
    }

    /// Snapshot path for one aggregate.
    pub fn snapshot_path(&self, id: AggregateId) -> PathBuf {
        self.snapshots_dir().join(format!("{id}.json"))
    }
}

/// Durable [`EventStore`] implementation over JSONL logs.
#[derive(Clone)]
pub struct JournalStore {
    layout: JournalLayout,
    /// Known sequences per aggregate, plus the append lock. Populated
    /// lazily from the log on first touch of each aggregate.
    index: Arc<Mutex<HashMap<AggregateId, HashSet<u64>>>>,
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("base_dir", &self.layout.base_dir())
            .finish()
    }
}

impl JournalStore {
    /// Open or create a journal store rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the stream or snapshot directories cannot
    /// be created.
    pub async fn open(base_dir: impl AsRef<Path>) -> io::Result<Self> {
        let layout = JournalLayout::new(base_dir.as_ref());
        let streams = layout.streams_dir();
        let snapshots = layout.snapshots_dir();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(streams)?;
            std::fs::create_dir_all(snapshots)
        })
        .await
        .map_err(io::Error::other)??;

        Ok(Self {
            layout,
            index: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns the layout describing this store's directories.
    pub fn layout(&self) -> &JournalLayout {
        &self.layout
    }

    /// Read and decode every event in one aggregate's log.
    ///
    /// A missing log file is an empty stream.
    async fn read_stream(&self, id: AggregateId) -> Result<Vec<RecordedEvent>, StoreError> {
        let path = self.layout.stream_path(id);
        tokio::task::spawn_blocking(move || read_stream_blocking(&path))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

/// Decode a JSONL event log; missing file means empty stream.
fn read_stream_blocking(path: &Path) -> Result<Vec<RecordedEvent>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Unavailable(e.to_string())),
    };

    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                StoreError::Unavailable(format!(
                    "corrupt journal line in {}: {e}",
                    path.display()
                ))
            })
        })
        .collect()
}

#[async_trait]
impl EventStore for JournalStore {
    async fn append(
        &self,
        events: Vec<RecordedEvent>,
        projections: &[Arc<dyn Projection>],
    ) -> Result<(), StoreError> {
        validate_batch(&events)?;
        let id = events[0].aggregate_id;

        // The index lock is held across conflict check, projections, and
        // the file write: appends are linearizable store-wide.
        let mut index = self.index.lock().await;

        if !index.contains_key(&id) {
            let known = self
                .read_stream(id)
                .await?
                .into_iter()
                .map(|e| e.sequence)
                .collect::<HashSet<u64>>();
            index.insert(id, known);
        }
        let known = index.get_mut(&id).expect("index entry was just inserted");

        if events.iter().any(|e| known.contains(&e.sequence)) {
            return Err(StoreError::Conflict);
        }

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

        let mut lines = String::new();
        for event in &events {
            let line = serde_json::to_string(event)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let path = self.layout.stream_path(id);
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(lines.as_bytes())?;
            file.sync_data()
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        known.extend(events.iter().map(|e| e.sequence));
        tracing::debug!(
            aggregate_id = %id,
            count = events.len(),
            "events journaled"
        );
        Ok(())
    }

    async fn events(
        &self,
        id: AggregateId,
        after: u64,
        up_to: u64,
    ) -> Result<Vec<RecordedEvent>, StoreError> {
        let mut events = self.read_stream(id).await?;
        events.retain(|e| e.sequence > after && e.sequence <= up_to);
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn snapshot(
        &self,
        id: AggregateId,
        after: u64,
        up_to: u64,
    ) -> Result<Option<Snapshot>, StoreError> {
        let path = self.layout.snapshot_path(id);
        let snapshot = tokio::task::spawn_blocking(move || load_snapshot_blocking(&path))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))??;

        Ok(snapshot.filter(|s| s.sequence > after && s.sequence <= up_to))
    }

    async fn commit_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let path = self.layout.snapshot_path(snapshot.aggregate_id);
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            // A snapshot at or below the stored sequence is a no-op.
            if let Some(stored) = load_snapshot_blocking(&path)?
                && stored.sequence >= snapshot.sequence
            {
                return Ok(());
            }

            let json = serde_json::to_vec_pretty(&snapshot)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, &json)
                .and_then(|()| std::fs::rename(&tmp_path, &path))
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

/// Load the retained snapshot from disk.
///
/// A missing file is `None`; a corrupt file is logged and treated as a
/// cache miss, since events past the snapshot point remain authoritative.
fn load_snapshot_blocking(path: &Path) -> Result<Option<Snapshot>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Unavailable(e.to_string())),
    };

    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snap) => Ok(Some(snap)),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to deserialize snapshot; treating as cache miss"
            );
            Ok(None)
        }
    }
}
