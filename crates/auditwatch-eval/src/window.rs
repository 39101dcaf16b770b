//! Grouping keys and the per-key sliding-window occurrence counter.
//!
//! Eviction is always relative to the timestamp being added, never to the
//! wall clock, so replaying a historical log and tailing it live produce
//! the same counts.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

// =============================================================================
// Window Key
// =============================================================================

/// Placeholder used for key parts whose field is absent from the event.
pub const UNKNOWN: &str = "unknown";

/// Composite grouping key (one or more parts, compared by value).
///
/// A single-part key is a plain value such as an IP address; the insider
/// rule uses a two-part `(username, role)` key.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct WindowKey(pub Vec<String>);

impl WindowKey {
    pub fn single(value: impl Into<String>) -> Self {
        WindowKey(vec![value.into()])
    }

    pub fn pair(first: impl Into<String>, second: impl Into<String>) -> Self {
        WindowKey(vec![first.into(), second.into()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

// =============================================================================
// Window Tracker
// =============================================================================

/// Per-key ordered timestamps bounded by a time window and a hard capacity.
///
/// Each detector owns exactly one tracker; the tracker is never shared.
#[derive(Debug, Clone)]
pub struct WindowTracker<K = WindowKey> {
    window: TimeDelta,
    capacity: usize,
    state: HashMap<K, VecDeque<NaiveDateTime>>,
}

impl<K: Hash + Eq + Clone> WindowTracker<K> {
    /// Create a tracker. A zero `capacity` is treated as one.
    pub fn new(window: TimeDelta, capacity: usize) -> Self {
        WindowTracker {
            window,
            capacity: capacity.max(1),
            state: HashMap::new(),
        }
    }

    /// Record an occurrence and return the number of entries now held for `key`.
    ///
    /// The timestamp is appended, entries strictly older than
    /// `ts - window` are evicted from the front, and the oldest entries are
    /// dropped if the sequence is longer than the capacity. Out-of-order
    /// timestamps are appended as-is.
    pub fn add(&mut self, key: &K, ts: NaiveDateTime) -> usize {
        let cutoff = ts - self.window;
        let capacity = self.capacity;

        let timestamps = self.state.entry(key.clone()).or_default();
        timestamps.push_back(ts);
        while timestamps.front().is_some_and(|&t| t < cutoff) {
            timestamps.pop_front();
        }
        while timestamps.len() > capacity {
            timestamps.pop_front();
        }
        timestamps.len()
    }

    /// Forget every entry for `key`.
    pub fn clear(&mut self, key: &K) {
        self.state.remove(key);
    }

    /// Number of entries currently held for `key`.
    pub fn count(&self, key: &K) -> usize {
        self.state.get(key).map_or(0, VecDeque::len)
    }

    /// Entries currently held for `key`, oldest first.
    pub fn timestamps(&self, key: &K) -> impl Iterator<Item = &NaiveDateTime> {
        self.state.get(key).into_iter().flatten()
    }

    /// Number of keys with state.
    pub fn key_count(&self) -> usize {
        self.state.len()
    }

    /// Evict entries older than `now - window` for every key and drop keys
    /// left empty. Returns how many keys were dropped.
    pub fn prune(&mut self, now: NaiveDateTime) -> usize {
        let cutoff = now - self.window;
        let before = self.state.len();
        self.state.retain(|_, timestamps| {
            while timestamps.front().is_some_and(|&t| t < cutoff) {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });
        before - self.state.len()
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}


// =============================================================================
// Property-based tests
// =============================================================================
