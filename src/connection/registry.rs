//! Connection Registry
//!
//! A recency list of live connections, used to find idle ones without
//! scanning. Every time a connection does I/O it is moved to the front, so
//! the back of the list is always the connection that has been quiet the
//! longest.
//!
//! ```text
//!   HEAD ⇄ most recent ⇄ ... ⇄ least recent ⇄ TAIL
//! ```
//!
//! Nodes live in a [`Slab`] and link to each other by index. The two
//! sentinels occupy fixed slots, are never removed, and make every splice
//! branch-free: a live node always has both a predecessor and a successor.

use slab::Slab;

const HEAD: usize = 0;
const TAIL: usize = 1;

/// Stable identifier of a node in a [`ConnectionRegistry`].
///
/// Valid until the node is removed; the slot may be reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node<T> {
    value: Option<T>,
    prev: usize,
    next: usize,
}

/// Doubly linked recency list over an index arena.
#[derive(Debug)]
pub struct ConnectionRegistry<T> {
    nodes: Slab<Node<T>>,
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConnectionRegistry<T> {
    /// Creates an empty registry holding only the two sentinels.
    pub fn new() -> Self {
        let mut nodes = Slab::with_capacity(2);
        let head = nodes.insert(Node {
            value: None,
            prev: HEAD,
            next: TAIL,
        });
        let tail = nodes.insert(Node {
            value: None,
            prev: HEAD,
            next: TAIL,
        });
        debug_assert_eq!((head, tail), (HEAD, TAIL));
        Self { nodes }
    }

    /// Number of live (non-sentinel) nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - 2
    }

    /// Returns `true` if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `value` as the most recently active node.
    pub fn insert(&mut self, value: T) -> NodeId {
        let id = self.nodes.insert(Node {
            value: Some(value),
            prev: HEAD,
            next: HEAD,
        });
        self.link_front(id);
        NodeId(id)
    }

    /// Unlinks `id` and returns its value.
    ///
    /// Returns `None` for sentinels and for ids that are no longer live.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        if !self.is_live(id.0) {
            return None;
        }
        self.unlink(id.0);
        self.nodes.remove(id.0).value
    }

    /// Moves `id` to the most recently active position.
    ///
    /// Returns `false` if `id` is not live.
    pub fn touch(&mut self, id: NodeId) -> bool {
        if !self.is_live(id.0) {
            return false;
        }
        if self.nodes[HEAD].next != id.0 {
            self.unlink(id.0);
            self.link_front(id.0);
        }
        true
    }

    /// Value stored at `id`.
    pub fn get(&self, id: NodeId) -> Option<&T> {
        if id.0 == HEAD || id.0 == TAIL {
            return None;
        }
        self.nodes.get(id.0).and_then(|node| node.value.as_ref())
    }

    /// The node that has gone the longest without being touched.
    pub fn least_recent(&self) -> Option<(NodeId, &T)> {
        let id = self.nodes[TAIL].prev;
        self.nodes[id].value.as_ref().map(|value| (NodeId(id), value))
    }

    /// The most recently inserted or touched node.
    pub fn most_recent(&self) -> Option<(NodeId, &T)> {
        let id = self.nodes[HEAD].next;
        self.nodes[id].value.as_ref().map(|value| (NodeId(id), value))
    }

    /// Iterates from the least recently active node towards the most recent.
    pub fn iter_lru(&self) -> IterLru<'_, T> {
        IterLru {
            registry: self,
            cursor: self.nodes[TAIL].prev,
        }
    }

    fn is_live(&self, id: usize) -> bool {
        id != HEAD && id != TAIL && self.nodes.contains(id)
    }

    fn link_front(&mut self, id: usize) {
        let first = self.nodes[HEAD].next;
        self.nodes[id].prev = HEAD;
        self.nodes[id].next = first;
        self.nodes[first].prev = id;
        self.nodes[HEAD].next = id;
    }

    fn unlink(&mut self, id: usize) {
        let Node { prev, next, .. } = self.nodes[id];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
    }
}

/// Iterator returned by [`ConnectionRegistry::iter_lru`].
pub struct IterLru<'a, T> {
    registry: &'a ConnectionRegistry<T>,
    cursor: usize,
}

impl<'a, T> Iterator for IterLru<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let registry = self.registry;
        let node = &registry.nodes[self.cursor];
        let value = node.value.as_ref()?;
        let item = (NodeId(self.cursor), value);
        self.cursor = node.prev;
        Some(item)
    }
}
