//! Persistence and shared-cache capabilities.
//!
//! The listener core treats durable storage and the cross-process cache as external
//! collaborators, specified only at their interface. [`MemoryStore`] is the in-process
//! reference implementation, suitable for tests and single-process deployments; database or
//! Redis backed implementations live outside this crate.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use alloy::primitives::{Address, BlockNumber, B256};

use crate::{dispatcher::FailedEventRecord, error::ValidationError, registry::MonitoredEvent};

/// Cache key guarding against overlapping runs.
pub const RUN_LOCK_KEY: &str = "ethereum_events.run_lock";

/// Cache key for the registry-changed signal.
///
/// Set on every registry mutation, polled once per scan unit; registry edits therefore take
/// effect at the next unit boundary, not instantaneously.
pub const REGISTRY_CHANGED_KEY: &str = "ethereum_events.registry_changed";

/// The singleton checkpoint record.
///
/// `last_processed_block` is monotonically non-decreasing and only advances after a scan unit
/// has been fully fetched, decoded and dispatched. `last_error_block` marks the first
/// unprocessed block of an aborted run, for operator visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub last_processed_block: BlockNumber,
    pub last_error_block: BlockNumber,
    pub updated_at: SystemTime,
}

impl Default for Cursor {
    fn default() -> Self {
        Self { last_processed_block: 0, last_error_block: 0, updated_at: SystemTime::now() }
    }
}

/// Durable store for monitored-event definitions.
pub trait EventStore: Send + Sync {
    /// Persists a new monitored event.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Duplicate`] if the (topic, address) pair already exists.
    fn insert(&self, event: MonitoredEvent) -> Result<(), ValidationError>;

    /// Deletes the record matching (address, topic). Returns the number of records removed.
    fn remove(&self, address: Address, topic: B256) -> usize;

    /// All monitored events, in registration order.
    fn list(&self) -> Vec<MonitoredEvent>;

    /// Atomically stamps `monitored_from` if it is currently unset. Set-once: a stamped value
    /// is never overwritten.
    fn stamp_monitored_from(&self, address: Address, topic: B256, block: BlockNumber);
}

/// Durable store for the singleton [`Cursor`].
pub trait CursorStore: Send + Sync {
    fn load(&self) -> Cursor;
    fn save(&self, cursor: &Cursor);
}

/// Durable store for handler-failure records awaiting manual replay.
pub trait FailureStore: Send + Sync {
    fn record(&self, failure: FailedEventRecord);
    fn all(&self) -> Vec<FailedEventRecord>;
}

/// A shared key-value cache readable and writable across process boundaries.
///
/// Carries the run lock and the registry-changed signal. Real deployments back this with
/// memcached or Redis, where registry mutations may happen in a different process than the
/// scanning run.
pub trait SharedCache: Send + Sync {
    /// Atomic add-if-absent: stores the value and returns `true` only if the key was not
    /// present. The mutual-exclusion primitive for the run lock.
    fn add_if_absent(&self, key: &str, value: &str) -> bool;

    /// Removes a key.
    fn remove(&self, key: &str);

    /// Sets a boolean flag.
    fn set_flag(&self, key: &str, value: bool);

    /// Reads a boolean flag; absent means `false`.
    fn flag(&self, key: &str) -> bool;
}

/// In-process implementation of all storage capabilities.
#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<MonitoredEvent>>,
    cursor: Mutex<Cursor>,
    failures: Mutex<Vec<FailedEventRecord>>,
    entries: Mutex<HashMap<String, String>>,
    flags: Mutex<HashMap<String, bool>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventStore for MemoryStore {
    fn insert(&self, event: MonitoredEvent) -> Result<(), ValidationError> {
        let mut events = locked(&self.events);
        if events.iter().any(|e| e.topic == event.topic && e.address == event.address) {
            return Err(ValidationError::Duplicate { name: event.name, address: event.address });
        }
        events.push(event);
        Ok(())
    }

    fn remove(&self, address: Address, topic: B256) -> usize {
        let mut events = locked(&self.events);
        let before = events.len();
        events.retain(|e| !(e.address == address && e.topic == topic));
        before - events.len()
    }

    fn list(&self) -> Vec<MonitoredEvent> {
        locked(&self.events).clone()
    }

    fn stamp_monitored_from(&self, address: Address, topic: B256, block: BlockNumber) {
        let mut events = locked(&self.events);
        if let Some(event) =
            events.iter_mut().find(|e| e.address == address && e.topic == topic)
        {
            if event.monitored_from.is_none() {
                event.monitored_from = Some(block);
            }
        }
    }
}

impl CursorStore for MemoryStore {
    fn load(&self) -> Cursor {
        locked(&self.cursor).clone()
    }

    fn save(&self, cursor: &Cursor) {
        *locked(&self.cursor) = cursor.clone();
    }
}

impl FailureStore for MemoryStore {
    fn record(&self, failure: FailedEventRecord) {
        locked(&self.failures).push(failure);
    }

    fn all(&self) -> Vec<FailedEventRecord> {
        locked(&self.failures).clone()
    }
}

impl SharedCache for MemoryStore {
    fn add_if_absent(&self, key: &str, value: &str) -> bool {
        let mut entries = locked(&self.entries);
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_owned(), value.to_owned());
        true
    }

    fn remove(&self, key: &str) {
        locked(&self.entries).remove(key);
    }

    fn set_flag(&self, key: &str, value: bool) {
        locked(&self.flags).insert(key.to_owned(), value);
    }

    fn flag(&self, key: &str) -> bool {
        locked(&self.flags).get(key).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_if_absent_is_exclusive_until_removed() {
        let store = MemoryStore::new();
        assert!(store.add_if_absent(RUN_LOCK_KEY, "locked"));
        assert!(!store.add_if_absent(RUN_LOCK_KEY, "locked"));
        SharedCache::remove(&store, RUN_LOCK_KEY);
        assert!(store.add_if_absent(RUN_LOCK_KEY, "locked"));
    }

    #[test]
    fn flags_default_to_false() {
        let store = MemoryStore::new();
        assert!(!store.flag(REGISTRY_CHANGED_KEY));
        store.set_flag(REGISTRY_CHANGED_KEY, true);
        assert!(store.flag(REGISTRY_CHANGED_KEY));
        store.set_flag(REGISTRY_CHANGED_KEY, false);
        assert!(!store.flag(REGISTRY_CHANGED_KEY));
    }

    #[test]
    fn cursor_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.load().last_processed_block, 0);

        let mut cursor = store.load();
        cursor.last_processed_block = 42;
        cursor.last_error_block = 7;
        store.save(&cursor);

        let loaded = store.load();
        assert_eq!(loaded.last_processed_block, 42);
        assert_eq!(loaded.last_error_block, 7);
    }
}
