//! Hybrid logical clock and aggregate identity.
//!
//! The clock combines wall-clock milliseconds with a logical counter and a
//! per-process node identity. Every call to [`HybridClock::now`] returns a
//! timestamp strictly greater than any previous one from the same clock,
//! even under concurrent callers; ties between nodes that observe the same
//! `(millis, counter)` pair are broken by the node identity, so timestamps
//! are totally ordered across the whole system.
//!
//! Timestamps serve two roles: they are stamped on every recorded event,
//! and a freshly minted one becomes an [`AggregateId`] when an aggregate is
//! created.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A hybrid logical clock timestamp.
///
/// Ordered lexicographically by `(millis, counter, node)`. The canonical
/// string form (`Display` / `FromStr` / serde) is three fixed-width hex
/// groups joined by `-`; because the widths are fixed, string ordering
/// agrees with timestamp ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HlcTimestamp {
    /// Milliseconds since the unix epoch when the timestamp was issued.
    pub millis: u64,
    /// Logical counter disambiguating timestamps within one millisecond.
    pub counter: u32,
    /// Identity of the node that issued the timestamp.
    pub node: u64,
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:012x}-{:08x}-{:016x}",
            self.millis, self.counter, self.node
        )
    }
}

/// Error parsing the canonical string form of a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed hlc timestamp '{0}'")]
pub struct ParseTimestampError(String);

impl FromStr for HlcTimestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseTimestampError(s.to_string());
        let mut parts = s.split('-');
        let millis = parts.next().ok_or_else(malformed)?;
        let counter = parts.next().ok_or_else(malformed)?;
        let node = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some()
            || millis.len() != 12
            || counter.len() != 8
            || node.len() != 16
        {
            return Err(malformed());
        }
        Ok(Self {
            millis: u64::from_str_radix(millis, 16).map_err(|_| malformed())?,
            counter: u32::from_str_radix(counter, 16).map_err(|_| malformed())?,
            node: u64::from_str_radix(node, 16).map_err(|_| malformed())?,
        })
    }
}

impl Serialize for HlcTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HlcTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error produced when the clock cannot issue a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The system clock reads before the unix epoch.
    #[error("system time is before the unix epoch")]
    PreEpoch,
    /// The logical counter was exhausted within a single millisecond.
    #[error("logical counter exhausted within one millisecond")]
    CounterExhausted,
}

/// Shared tick state: the last issued `(millis, counter)` pair.
type Tick = (u64, u32);

/// Process-wide hybrid logical clock.
///
/// Cheap to clone; clones share the monotonicity state, so every clone
/// participates in the same strictly-increasing sequence.
#[derive(Debug, Clone)]
pub struct HybridClock {
    node: u64,
    last: Arc<Mutex<Tick>>,
}

impl HybridClock {
    /// Create a clock with a random node identity.
    pub fn new() -> Self {
        let (hi, _lo) = Uuid::new_v4().as_u64_pair();
        Self::with_node(hi)
    }

    /// Create a clock with an explicit node identity.
    ///
    /// Distinct nodes in one deployment must use distinct identities;
    /// the identity is the final ordering tie-breaker.
    pub fn with_node(node: u64) -> Self {
        Self {
            node,
            last: Arc::new(Mutex::new((0, 0))),
        }
    }

    /// The node identity this clock stamps on timestamps.
    pub fn node(&self) -> u64 {
        self.node
    }

    /// Issue a timestamp strictly greater than any previous one from this
    /// clock (or any of its clones).
    ///
    /// If wall time advanced past the last issued millisecond, the new
    /// millisecond is taken with a zero counter; otherwise the last
    /// millisecond is reused and the counter incremented.
    ///
    /// # Errors
    ///
    /// * [`ClockError::PreEpoch`] -- the system clock reads before 1970.
    /// * [`ClockError::CounterExhausted`] -- more than `u32::MAX` timestamps
    ///   were issued within one millisecond.
    pub fn now(&self) -> Result<HlcTimestamp, ClockError> {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| ClockError::PreEpoch)?
            .as_millis() as u64;

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if wall > last.0 {
            *last = (wall, 0);
        } else {
            last.1 = last.1.checked_add(1).ok_or(ClockError::CounterExhausted)?;
        }
        Ok(HlcTimestamp {
            millis: last.0,
            counter: last.1,
            node: self.node,
        })
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Globally unique aggregate identity: the HLC timestamp minted when the
/// aggregate was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggregateId(HlcTimestamp);

impl AggregateId {
    /// Wrap a minted timestamp as an aggregate identity.
    pub fn new(ts: HlcTimestamp) -> Self {
        Self(ts)
    }

    /// The underlying creation timestamp.
    pub fn timestamp(&self) -> HlcTimestamp {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AggregateId {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for AggregateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AggregateId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        HlcTimestamp::deserialize(deserializer).map(Self)
    }
}
