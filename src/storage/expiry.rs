//! Expiration Queue
//!
//! A binary min-heap of pending key expirations, ordered by deadline.
//! The nearest deadline is always at index 0, so the event loop can read
//! how long it may sleep in O(1) and evict due keys by repeatedly popping.
//!
//! ## Handles instead of positions
//!
//! A key's TTL can be refreshed or cancelled at any time, which requires
//! finding that key's element inside the heap. Scanning would be O(n), so
//! every element is issued a stable [`ExpiryHandle`] when it is pushed.
//! The queue keeps an indirection table mapping each live handle to the
//! element's current array index:
//!
//! ```text
//!   positions (slab)            heap (dense array)
//!   ┌────────┬─────┐            ┌─────┬─────┬─────┬─────┐
//!   │ handle │ pos │            │  0  │  1  │  2  │  3  │
//!   ├────────┼─────┤            ├─────┼─────┼─────┼─────┤
//!   │   0    │  2  │───────┐    │ h=3 │ h=1 │ h=0 │ h=2 │
//!   │   1    │  1  │       └───>│     │     │ ▲   │     │
//!   │   2    │  3  │            └─────┴─────┴─────┴─────┘
//!   │   3    │  0  │
//!   └────────┴─────┘
//! ```
//!
//! Every swap during sift-up, sift-down or delete rewrites the table slots
//! of both displaced elements, so `positions[h]` is always the true index
//! of handle `h`. This keeps update and delete at O(log n).

use slab::Slab;
use std::time::Instant;

/// Stable identifier for an element of an [`ExpirationQueue`].
///
/// Valid from `push` until the element is deleted or popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpiryHandle(usize);

/// One pending expiration.
#[derive(Debug, Clone)]
pub struct HeapEntry<P> {
    /// When the owner expires.
    pub expires_at: Instant,
    /// Back-reference used to locate this element after it moves.
    pub handle: ExpiryHandle,
    /// Identifies the owner of this expiration.
    pub payload: P,
}

/// Min-heap of deadlines with O(log n) update and delete by handle.
#[derive(Debug)]
pub struct ExpirationQueue<P> {
    heap: Vec<HeapEntry<P>>,
    positions: Slab<usize>,
}

impl<P> Default for ExpirationQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn parent(pos: usize) -> usize {
    (pos - 1) / 2
}

#[inline]
fn left_child(pos: usize) -> usize {
    2 * pos + 1
}

#[inline]
fn right_child(pos: usize) -> usize {
    2 * pos + 2
}

impl<P> ExpirationQueue<P> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            positions: Slab::new(),
        }
    }

    /// Number of pending expirations.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is scheduled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The element with the earliest deadline.
    #[inline]
    pub fn top(&self) -> Option<&HeapEntry<P>> {
        self.heap.first()
    }

    /// Current array index of `handle`, if it is still queued.
    #[inline]
    pub fn position(&self, handle: ExpiryHandle) -> Option<usize> {
        self.positions.get(handle.0).copied()
    }

    /// Deadline currently recorded for `handle`.
    pub fn deadline(&self, handle: ExpiryHandle) -> Option<Instant> {
        self.position(handle).map(|pos| self.heap[pos].expires_at)
    }

    /// Schedules `payload` to expire at `expires_at`.
    pub fn push(&mut self, expires_at: Instant, payload: P) -> ExpiryHandle {
        let pos = self.heap.len();
        let handle = ExpiryHandle(self.positions.insert(pos));
        self.heap.push(HeapEntry {
            expires_at,
            handle,
            payload,
        });
        self.sift_up(pos);
        handle
    }

    /// Moves the deadline of `handle` to `expires_at`.
    ///
    /// Returns `false` if the handle is no longer queued.
    pub fn update(&mut self, handle: ExpiryHandle, expires_at: Instant) -> bool {
        let Some(pos) = self.position(handle) else {
            return false;
        };
        self.heap[pos].expires_at = expires_at;
        self.restore(pos);
        true
    }

    /// Cancels `handle`, returning its payload.
    pub fn delete(&mut self, handle: ExpiryHandle) -> Option<P> {
        let pos = self.position(handle)?;
        Some(self.remove_at(pos).payload)
    }

    /// Removes and returns the element with the earliest deadline.
    pub fn pop(&mut self) -> Option<HeapEntry<P>> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    /// Pops the earliest element only if its deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<HeapEntry<P>> {
        match self.top() {
            Some(entry) if entry.expires_at <= now => self.pop(),
            _ => None,
        }
    }

    /// Swaps `pos` with the last element, shrinks by one, and re-sifts the
    /// element that moved into `pos`.
    fn remove_at(&mut self, pos: usize) -> HeapEntry<P> {
        let removed = self.heap.swap_remove(pos);
        self.positions.remove(removed.handle.0);

        if pos < self.heap.len() {
            self.positions[self.heap[pos].handle.0] = pos;
            self.restore(pos);
        }
        removed
    }

    /// Sifts `pos` up if it is now smaller than its parent, else down.
    fn restore(&mut self, pos: usize) {
        if pos > 0 && self.heap[pos].expires_at < self.heap[parent(pos)].expires_at {
            self.sift_up(pos);
        } else {
            self.sift_down(pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let up = parent(pos);
            if self.heap[pos].expires_at >= self.heap[up].expires_at {
                break;
            }
            self.swap(pos, up);
            pos = up;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let mut smallest = pos;
            for child in [left_child(pos), right_child(pos)] {
                if child < len && self.heap[child].expires_at < self.heap[smallest].expires_at {
                    smallest = child;
                }
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// Swaps two elements and rewrites both of their position slots.
    #[inline]
    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions[self.heap[a].handle.0] = a;
        self.positions[self.heap[b].handle.0] = b;
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for (pos, entry) in self.heap.iter().enumerate() {
            assert_eq!(self.position(entry.handle), Some(pos));
            if pos > 0 {
                assert!(self.heap[parent(pos)].expires_at <= entry.expires_at);
            }
        }
        assert_eq!(self.positions.len(), self.heap.len());
    }
}
