//! Growable Byte Queue
//!
//! `ByteBuffer` is the staging area between a socket and the wire codec.
//! Every connection owns two of them: one collecting bytes read from the
//! peer until a complete frame is available, and one holding encoded
//! responses until the socket accepts them.
//!
//! ## Layout
//!
//! ```text
//!   0            begin                 end              capacity
//!   ├────────────┼─────────────────────┼──────────────────┤
//!   │  consumed  │   unconsumed data   │    free space    │
//!   └────────────┴─────────────────────┴──────────────────┘
//! ```
//!
//! - `append` writes at `end`, doubling the allocation until the data fits.
//! - `consume` moves `begin` forward. Once `begin` catches up with `end`,
//!   both cursors snap back to zero so the buffer does not drift forever.
//! - Growth copies only the unconsumed region to the start of the new
//!   allocation, so a grown buffer is also a compacted one.
//!
//! The buffer never shrinks and enforces no upper bound; callers apply
//! their own message-size limits before appending.

use bytes::Buf;

/// Smallest allocation made on the first append.
const MIN_CAPACITY: usize = 64;

/// A contiguous FIFO byte queue with amortized O(1) append.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    begin: usize,
    end: usize,
}

impl ByteBuffer {
    /// Creates an empty buffer without allocating.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer with room for at least `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            begin: 0,
            end: 0,
        }
    }

    /// Appends `bytes` after the unconsumed region.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.end + bytes.len() > self.data.len() {
            self.grow(bytes.len());
        }
        self.data[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
    }

    /// Marks the first `n` unconsumed bytes as read.
    ///
    /// Consuming more than [`size`](Self::size) empties the buffer.
    pub fn consume(&mut self, n: usize) {
        self.begin = (self.begin + n).min(self.end);
        if self.begin == self.end {
            self.begin = 0;
            self.end = 0;
        }
    }

    /// Number of unconsumed bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    /// Returns `true` if there is nothing left to consume.
    #[inline]
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Total bytes the current allocation can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The unconsumed region, oldest byte first.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.begin..self.end]
    }

    /// Doubles the allocation until `additional` more bytes fit, moving the
    /// unconsumed region to the front.
    fn grow(&mut self, additional: usize) {
        let live = self.size();
        let mut capacity = self.data.len().max(MIN_CAPACITY);
        while capacity < live + additional {
            capacity *= 2;
        }

        if capacity == self.data.len() {
            // Enough room once the consumed prefix is reclaimed.
            self.data.copy_within(self.begin..self.end, 0);
        } else {
            let mut data = vec![0; capacity];
            data[..live].copy_from_slice(self.as_slice());
            self.data = data;
        }
        self.begin = 0;
        self.end = live;
    }
}

impl Buf for ByteBuffer {
    fn remaining(&self) -> usize {
        self.size()
    }

    fn chunk(&self) -> &[u8] {
        self.as_slice()
    }

    fn advance(&mut self, cnt: usize) {
        self.consume(cnt);
    }
}
