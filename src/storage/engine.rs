//! Keyspace with TTL Support
//!
//! `StorageEngine` is the state every command runs against. It owns the
//! [`HashIndex`] holding all entries and the [`ExpirationQueue`] holding
//! their deadlines, and keeps the two consistent.
//!
//! ## Design Decisions
//!
//! 1. **Single owner**: The engine lives on the event-loop thread and is
//!    borrowed mutably per command. There are no locks.
//! 2. **Explicit time**: Every operation that reads or schedules a deadline
//!    takes `now` from the caller, so a whole batch of requests sees one
//!    consistent clock and tests can drive time directly.
//! 3. **Lazy + Active Expiry**: The event loop evicts due keys after every
//!    wake-up (active). A read that races a deadline inside the same batch
//!    also drops the key on the spot (lazy).
//!
//! ## Entry / deadline linkage
//!
//! ```text
//!   HashIndex                         ExpirationQueue
//!   ┌──────────────────────────┐      ┌───────────────────────────┐
//!   │ Entry { key, value,      │      │ HeapEntry { expires_at,   │
//!   │         expiry: Some(h) }│─────>│   handle: h,              │
//!   └──────────────────────────┘      │   payload: (hash, key) }  │
//!                ▲                    └─────────────┬─────────────┘
//!                └──────── delete(hash, key) ───────┘
//! ```
//!
//! An entry without a TTL has `expiry: None` and no element in the queue.

use crate::storage::expiry::{ExpirationQueue, ExpiryHandle};
use crate::storage::hash_index::{fnv_hash, HashIndex, Keyed, DEFAULT_MAX_LOAD_FACTOR};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::trace;

/// Initial bucket count of the key index.
const INITIAL_CAPACITY: usize = 4;

/// A stored key-value pair.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The key this value is stored under
    pub key: Bytes,
    /// The actual value stored
    pub value: Bytes,
    /// Slot in the expiration queue (None = never expires)
    pub expiry: Option<ExpiryHandle>,
}

impl Keyed for Entry {
    type Key = Bytes;

    fn key(&self) -> &Bytes {
        &self.key
    }
}

/// What the expiration queue remembers about an entry.
type ExpiryPayload = (u64, Bytes);

/// Keyspace counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Number of keys with a pending expiration
    pub expiring_keys: u64,
    /// Keys removed because their TTL elapsed
    pub expired: u64,
}

/// The keyspace: entries plus their pending expirations.
///
/// # Example
///
/// ```
/// use nimbuskv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::{Duration, Instant};
///
/// let mut engine = StorageEngine::new();
/// let now = Instant::now();
///
/// engine.set(Bytes::from("name"), Bytes::from("nimbus"), None, now);
/// assert_eq!(engine.get(b"name", now), Some(Bytes::from("nimbus")));
///
/// engine.set(Bytes::from("session"), Bytes::from("abc"), Some(Duration::from_millis(100)), now);
/// assert_eq!(engine.evict_expired(now + Duration::from_millis(100)), 1);
/// assert_eq!(engine.get(b"session", now + Duration::from_millis(100)), None);
/// ```
#[derive(Debug)]
pub struct StorageEngine {
    index: HashIndex<Entry>,
    expirations: ExpirationQueue<ExpiryPayload>,
    stats: StorageStats,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty engine with the default load factor.
    pub fn new() -> Self {
        Self::with_load_factor(DEFAULT_MAX_LOAD_FACTOR)
    }

    /// Creates an empty engine whose index resizes past `max_load_factor`.
    pub fn with_load_factor(max_load_factor: f64) -> Self {
        Self {
            index: HashIndex::with_capacity(INITIAL_CAPACITY, max_load_factor),
            expirations: ExpirationQueue::new(),
            stats: StorageStats::default(),
        }
    }

    /// Gets the value for a key.
    ///
    /// A key whose deadline is at or before `now` is removed and reported
    /// missing even if the sweep has not reached it yet.
    pub fn get(&mut self, key: &[u8], now: Instant) -> Option<Bytes> {
        let hash = fnv_hash(key);

        let entry = self.index.lookup(hash, key)?;
        let expired = entry
            .expiry
            .and_then(|handle| self.expirations.deadline(handle))
            .is_some_and(|deadline| deadline <= now);

        if expired {
            self.remove(hash, key);
            self.stats.expired += 1;
            return None;
        }
        Some(entry.value.clone())
    }

    /// Sets a key-value pair, optionally with a TTL.
    ///
    /// An existing key keeps its expiration slot: a `Some` TTL moves the
    /// deadline in place, `None` cancels it.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(&mut self, key: Bytes, value: Bytes, ttl: Option<Duration>, now: Instant) -> bool {
        let hash = fnv_hash(&key);
        let deadline = ttl.map(|ttl| now + ttl);

        if let Some(entry) = self.index.lookup_mut(hash, &key[..]) {
            entry.value = value;
            let expiry = entry.expiry;
            let expiry = self.reschedule(expiry, deadline, hash, &key);
            self.set_expiry(hash, &key, expiry);
            return false;
        }

        let expiry = deadline.map(|at| self.expirations.push(at, (hash, key.clone())));
        self.index.insert(hash, Entry { key, value, expiry });
        true
    }

    /// Deletes a key and cancels its pending expiration.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.remove(fnv_hash(key), key)
    }

    /// Sets a new TTL on an existing key, installing a slot if it had none.
    ///
    /// # Returns
    ///
    /// Returns `true` if the expiry was set, `false` if the key doesn't exist.
    pub fn expire(&mut self, key: &[u8], ttl: Duration, now: Instant) -> bool {
        let hash = fnv_hash(key);
        let Some(entry) = self.index.lookup(hash, key) else {
            return false;
        };
        let (key, current) = (entry.key.clone(), entry.expiry);
        let expiry = self.reschedule(current, Some(now + ttl), hash, &key);
        self.set_expiry(hash, &key, expiry);
        true
    }

    /// Removes the expiry from a key (makes it persistent).
    ///
    /// # Returns
    ///
    /// Returns `true` if the key exists, whether or not it had an expiry.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        let hash = fnv_hash(key);
        let Some(entry) = self.index.lookup_mut(hash, key) else {
            return false;
        };
        if let Some(handle) = entry.expiry.take() {
            self.expirations.delete(handle);
        }
        true
    }

    /// Returns `true` if the key is stored (regardless of its deadline).
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.lookup(fnv_hash(key), key).is_some()
    }

    /// The deadline of a key, or `None` if it is missing or persistent.
    pub fn expires_at(&self, key: &[u8]) -> Option<Instant> {
        let entry = self.index.lookup(fnv_hash(key), key)?;
        entry
            .expiry
            .and_then(|handle| self.expirations.deadline(handle))
    }

    /// The earliest pending deadline across all keys.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.expirations.top().map(|entry| entry.expires_at)
    }

    /// Removes every key whose deadline is at or before `now`.
    ///
    /// # Returns
    ///
    /// Returns the number of keys evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some(due) = self.expirations.pop_expired(now) {
            let (hash, key) = due.payload;
            let removed = self.index.delete(hash, &key[..]);
            debug_assert!(
                removed.as_ref().and_then(|e| e.expiry) == Some(due.handle),
                "expiration popped for an entry that does not own it"
            );
            if removed.is_some() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.expired += evicted as u64;
            trace!(evicted, remaining = self.index.len(), "evicted expired keys");
        }
        evicted
    }

    /// Returns the number of keys stored.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the keyspace is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns keyspace statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.index.len() as u64,
            expiring_keys: self.expirations.len() as u64,
            ..self.stats
        }
    }

    /// Moves, installs or cancels an expiration slot and returns the slot
    /// the entry should record afterwards.
    fn reschedule(
        &mut self,
        current: Option<ExpiryHandle>,
        deadline: Option<Instant>,
        hash: u64,
        key: &Bytes,
    ) -> Option<ExpiryHandle> {
        match (current, deadline) {
            (Some(handle), Some(at)) => {
                self.expirations.update(handle, at);
                Some(handle)
            }
            (None, Some(at)) => Some(self.expirations.push(at, (hash, key.clone()))),
            (Some(handle), None) => {
                self.expirations.delete(handle);
                None
            }
            (None, None) => None,
        }
    }

    fn set_expiry(&mut self, hash: u64, key: &[u8], expiry: Option<ExpiryHandle>) {
        if let Some(entry) = self.index.lookup_mut(hash, key) {
            entry.expiry = expiry;
        }
    }

    /// Unlinks an entry from the index and cancels its expiration.
    fn remove(&mut self, hash: u64, key: &[u8]) -> bool {
        match self.index.delete(hash, key) {
            Some(entry) => {
                if let Some(handle) = entry.expiry {
                    self.expirations.delete(handle);
                }
                true
            }
            None => false,
        }
    }
}
