//! Open-Chaining Hash Index
//!
//! A hash table that maps a precomputed 64-bit hash to an owned entry.
//! Collisions are resolved by chaining: each bucket holds a singly linked
//! list of nodes, and every node carries the entry by value together with
//! the hash it was filed under.
//!
//! ## Why hashes are passed in
//!
//! The caller computes the hash once per request (see [`fnv_hash`]) and the
//! same value is used for lookup, insert and delete. Each node caches its
//! hash so chains can reject mismatches without touching the key, and so a
//! resize can refile nodes without rehashing keys.
//!
//! ## Resizing
//!
//! ```text
//!  capacity 4, mask 0b11           capacity 8, mask 0b111
//!  ┌───┐                           ┌───┐
//!  │ 0 │→ h=8 → h=4                │ 0 │→ h=8
//!  │ 1 │→ h=5                      │ 1 │
//!  │ 2 │                           │ 4 │→ h=4
//!  │ 3 │→ h=3 → h=7                │ 5 │→ h=5  ...
//!  └───┘                           └───┘
//! ```
//!
//! When `len / capacity` exceeds the maximum load factor after an insert,
//! the bucket array doubles and every node is relinked into its new bucket
//! before `insert` returns. Nodes are moved, never reallocated.

use std::borrow::Borrow;

/// Load factor used when none is configured.
pub const DEFAULT_MAX_LOAD_FACTOR: f64 = 1.0;

/// Initial number of buckets.
const DEFAULT_CAPACITY: usize = 4;

/// Types that can be stored in a [`HashIndex`].
///
/// The key type's `Eq` implementation is the equality used to resolve
/// collisions, so the comparison is fixed when the index type is chosen.
pub trait Keyed {
    /// The lookup key.
    type Key: ?Sized + Eq;

    /// Returns the key this entry is filed under.
    fn key(&self) -> &Self::Key;
}

/// Hashes a byte string with the 32-bit FNV-style mix used by the server.
///
/// The result is widened to `u64`; only the low bits matter for bucket
/// selection.
pub fn fnv_hash(data: &[u8]) -> u64 {
    let mut h: u32 = 0x811C_9DC5;
    for &byte in data {
        h = h.wrapping_add(u32::from(byte)).wrapping_mul(0x0100_0193);
    }
    u64::from(h)
}

#[derive(Debug)]
struct Node<T> {
    hash: u64,
    entry: T,
    next: Option<Box<Node<T>>>,
}

type Link<T> = Option<Box<Node<T>>>;

/// A power-of-two sized, chained hash table.
#[derive(Debug)]
pub struct HashIndex<T> {
    buckets: Vec<Link<T>>,
    mask: u64,
    len: usize,
    max_load_factor: f64,
}

impl<T: Keyed> Default for HashIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed> HashIndex<T> {
    /// Creates an index with the default capacity and load factor.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_MAX_LOAD_FACTOR)
    }

    /// Creates an index with at least `capacity` buckets.
    ///
    /// `capacity` is rounded up to a power of two. A non-finite or
    /// non-positive `max_load_factor` falls back to the default.
    pub fn with_capacity(capacity: usize, max_load_factor: f64) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let max_load_factor = if max_load_factor.is_finite() && max_load_factor > 0.0 {
            max_load_factor
        } else {
            DEFAULT_MAX_LOAD_FACTOR
        };

        Self {
            buckets: Self::empty_buckets(capacity),
            mask: (capacity - 1) as u64,
            len: 0,
            max_load_factor,
        }
    }

    fn empty_buckets(capacity: usize) -> Vec<Link<T>> {
        std::iter::repeat_with(|| None).take(capacity).collect()
    }

    /// Number of stored entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no entries are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of buckets. Always a power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn bucket(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    /// Prepends `entry` to the chain for `hash`.
    ///
    /// No duplicate check is made; the caller must have confirmed the key
    /// is absent. May trigger a resize before returning.
    pub fn insert(&mut self, hash: u64, entry: T) {
        let idx = self.bucket(hash);
        let next = self.buckets[idx].take();
        self.buckets[idx] = Some(Box::new(Node { hash, entry, next }));
        self.len += 1;

        if self.len as f64 / self.capacity() as f64 > self.max_load_factor {
            self.resize();
        }
    }

    /// Finds the entry filed under `hash` whose key equals `key`.
    pub fn lookup<Q>(&self, hash: u64, key: &Q) -> Option<&T>
    where
        T::Key: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mut cursor = self.buckets[self.bucket(hash)].as_deref();
        while let Some(node) = cursor {
            if node.hash == hash && node.entry.key().borrow() == key {
                return Some(&node.entry);
            }
            cursor = node.next.as_deref();
        }
        None
    }

    /// Mutable variant of [`lookup`](Self::lookup).
    pub fn lookup_mut<Q>(&mut self, hash: u64, key: &Q) -> Option<&mut T>
    where
        T::Key: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let idx = self.bucket(hash);
        let mut cursor = self.buckets[idx].as_deref_mut();
        while let Some(node) = cursor {
            if node.hash == hash && node.entry.key().borrow() == key {
                return Some(&mut node.entry);
            }
            cursor = node.next.as_deref_mut();
        }
        None
    }

    /// Unlinks the matching entry and hands it back to the caller.
    pub fn delete<Q>(&mut self, hash: u64, key: &Q) -> Option<T>
    where
        T::Key: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let idx = self.bucket(hash);
        let mut link = &mut self.buckets[idx];
        loop {
            let found = match link.as_deref() {
                None => return None,
                Some(node) => node.hash == hash && node.entry.key().borrow() == key,
            };
            if found {
                let mut removed = link.take()?;
                *link = removed.next.take();
                self.len -= 1;
                return Some(removed.entry);
            }
            link = &mut link.as_mut()?.next;
        }
    }

    /// Iterates over all entries in bucket order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            buckets: self.buckets.iter(),
            node: None,
        }
    }

    /// Doubles the bucket array and relinks every node.
    fn resize(&mut self) {
        let capacity = self.capacity() * 2;
        let old = std::mem::replace(&mut self.buckets, Self::empty_buckets(capacity));
        self.mask = (capacity - 1) as u64;

        for mut head in old {
            while let Some(mut node) = head {
                head = node.next.take();
                let idx = self.bucket(node.hash);
                node.next = self.buckets[idx].take();
                self.buckets[idx] = Some(node);
            }
        }

        tracing::trace!(capacity, len = self.len, "hash index resized");
    }
}

impl<T> Drop for HashIndex<T> {
    // Unlink chains iteratively so a long chain cannot overflow the stack
    // through recursive `Box` drops.
    fn drop(&mut self) {
        for bucket in &mut self.buckets {
            let mut cursor = bucket.take();
            while let Some(mut node) = cursor {
                cursor = node.next.take();
            }
        }
    }
}

/// Iterator over the entries of a [`HashIndex`].
pub struct Iter<'a, T> {
    buckets: std::slice::Iter<'a, Link<T>>,
    node: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.node {
                self.node = node.next.as_deref();
                return Some(&node.entry);
            }
            self.node = self.buckets.next()?.as_deref();
        }
    }
}
