//! Storage Engine Module
//!
//! This module provides the in-memory keyspace for NimbusKV: an
//! open-chaining hash index that owns every entry, and a min-heap of
//! pending expirations that refers back into it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌──────────────────────────┐  ┌─────────────────────────┐  │
//! │  │       HashIndex          │  │    ExpirationQueue      │  │
//! │  │  buckets[hash & mask]    │<─│  min-heap by deadline   │  │
//! │  │  → Entry → Entry → ...   │  │  + handle → position    │  │
//! │  └──────────────────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ evict_expired(now)
//!              ┌─────────────┴─────────────┐
//!              │   Event loop sweep        │
//!              │  (after every wake-up)    │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Power-of-two index**: bucket = `hash & mask`, doubles past the load factor
//! - **O(log n) TTL changes**: stable handles locate a key's heap slot
//! - **Explicit absence**: a key without a TTL has no heap slot at all
//! - **Lazy Expiry**: reads drop keys whose deadline has already passed
//! - **Active Expiry**: the event loop evicts due keys after every wake-up

pub mod engine;
pub mod expiry;
pub mod hash_index;

// Re-export commonly used types
pub use engine::{Entry, StorageEngine, StorageStats};
pub use expiry::{ExpirationQueue, ExpiryHandle, HeapEntry};
pub use hash_index::{fnv_hash, HashIndex, Keyed, DEFAULT_MAX_LOAD_FACTOR};
