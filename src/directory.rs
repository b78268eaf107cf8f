//! Directory mapping aggregate ids to their running actors.
//!
//! The directory is the single entry point for callers: it mints ids for
//! new aggregates, starts actors on demand, caches their handles, and
//! replaces handles whose actors have idle-evicted. Lookup is
//! concurrent-safe and startup is race-free -- the write-lock re-check
//! guarantees only one actor per id can ever exist at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::actor::{ActorConfig, Handle, spawn_actor};
use crate::aggregate::RootConfig;
use crate::clock::{AggregateId, HybridClock};
use crate::error::Error;
use crate::registry::HandlerRegistry;
use crate::runtime::{RetryPolicy, Runtime};
use crate::store::EventStore;

/// Default idle timeout for actors: 5 minutes.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default deadline for operations crossing the actor boundary.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide registry of live aggregate actors.
///
/// `Clone + Send + Sync`; clones share the underlying handle cache.
#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    clock: HybridClock,
    cache: Arc<RwLock<HashMap<AggregateId, Handle>>>,
    actor_config: ActorConfig,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("node", &self.clock.node())
            .finish_non_exhaustive()
    }
}

impl Directory {
    /// Start configuring a directory over a store and handler registry.
    pub fn builder(store: Arc<dyn EventStore>, registry: Arc<HandlerRegistry>) -> DirectoryBuilder {
        DirectoryBuilder {
            store,
            registry,
            clock: HybridClock::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            snapshot_every: None,
            retry: RetryPolicy::default(),
        }
    }

    /// The clock used to mint ids and stamp events.
    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    fn runtime_for(&self, root: &Arc<RootConfig>) -> Runtime {
        Runtime {
            root: Arc::clone(root),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            clock: self.clock.clone(),
            retry: self.retry,
        }
    }

    /// Create a new aggregate: mint an HLC id and start its actor.
    ///
    /// # Errors
    ///
    /// [`Error::ClockFailure`] when the clock cannot mint an id.
    pub async fn create(&self, root: &Arc<RootConfig>) -> Result<(AggregateId, Handle), Error> {
        let id = AggregateId::new(
            self.clock
                .now()
                .map_err(|e| Error::ClockFailure(e.to_string()))?,
        );
        let handle = spawn_actor(id, self.runtime_for(root), self.actor_config);

        let mut cache = self.cache.write().await;
        cache.insert(id, handle.clone());
        Ok((id, handle))
    }

    /// Return the running actor for `id`, starting one if none exists.
    ///
    /// If a cached handle's actor has exited (idle eviction, crash), the
    /// stale entry is replaced by a freshly spawned actor that recovers
    /// its state from the store.
    pub async fn whereis(&self, id: AggregateId, root: &Arc<RootConfig>) -> Handle {
        // Fast path: live handle under the read lock.
        {
            let cache = self.cache.read().await;
            if let Some(handle) = cache.get(&id)
                && handle.is_alive()
            {
                return handle.clone();
            }
        }

        // Slow path: re-check under the write lock, then spawn. The
        // re-check keeps startup race-free when two callers miss at once.
        let mut cache = self.cache.write().await;
        if let Some(handle) = cache.get(&id)
            && handle.is_alive()
        {
            return handle.clone();
        }

        let handle = spawn_actor(id, self.runtime_for(root), self.actor_config);
        cache.insert(id, handle.clone());
        handle
    }

    /// Number of cached handles whose actors are still alive.
    pub async fn live_count(&self) -> usize {
        let cache = self.cache.read().await;
        cache.values().filter(|h| h.is_alive()).count()
    }
}

/// Builder for a [`Directory`].
///
/// Created via [`Directory::builder`]; every knob has a default.
pub struct DirectoryBuilder {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    clock: HybridClock,
    idle_timeout: Duration,
    call_timeout: Duration,
    snapshot_every: Option<u64>,
    retry: RetryPolicy,
}

impl DirectoryBuilder {
    /// Use an explicit clock (e.g. one with a fixed node identity).
    ///
    /// Defaults to a fresh clock with a random node identity.
    pub fn clock(mut self, clock: HybridClock) -> Self {
        self.clock = clock;
        self
    }

    /// Set the idle timeout for actor eviction.
    ///
    /// Actors that receive no messages for this duration shut down; the
    /// next [`whereis`](Directory::whereis) transparently respawns them
    /// and recovers state from the store. Defaults to 5 minutes.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the deadline applied to every operation crossing the actor
    /// boundary. Defaults to 30 seconds.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Capture a snapshot automatically once this many events have been
    /// committed since the last capture. Disabled by default.
    pub fn snapshot_every(mut self, events: u64) -> Self {
        self.snapshot_every = Some(events);
        self
    }

    /// Set the backoff policy paced between conflict retries.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the directory.
    pub fn build(self) -> Directory {
        Directory {
            store: self.store,
            registry: self.registry,
            clock: self.clock,
            cache: Arc::new(RwLock::new(HashMap::new())),
            actor_config: ActorConfig {
                idle_timeout: self.idle_timeout,
                call_timeout: self.call_timeout,
                snapshot_every: self.snapshot_every,
            },
            retry: self.retry,
        }
    }
}
