//! Chain Nodes and the Arena That Owns Them
//!
//! Every stored entry lives in a [`NodeArena`] slot and is addressed by a
//! [`NodeId`]. A node carries its precomputed hash code and the id of its
//! successor in whatever bucket chain currently holds it. Tables never own
//! nodes directly; they only hold chain heads, so moving a node between two
//! tables is just an index rewrite.
//!
//! ```text
//!   bucket[3] ──> #7 ──> #2 ──> None
//!                  │      │
//!                  ▼      ▼
//!   arena:  [ .. #2{hash, next: None, payload} .. #7{hash, next: #2, payload} .. ]
//! ```

/// Stable handle to a node inside a [`NodeArena`].
///
/// Ids stay valid until the node is released; a released slot may be
/// handed out again by a later allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the raw slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A link unit plus its payload.
#[derive(Debug)]
pub struct Node<T> {
    /// Computed once at allocation, never recomputed.
    pub hash_code: u64,
    /// Successor in the current bucket chain.
    pub next: Option<NodeId>,
    pub payload: T,
}

/// Slab-style storage for chain nodes with a free list.
#[derive(Debug)]
pub struct NodeArena<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<NodeId>,
    live: usize,
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NodeArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Stores a detached node and returns its id.
    pub fn alloc(&mut self, hash_code: u64, payload: T) -> NodeId {
        let node = Node {
            hash_code,
            next: None,
            payload,
        };
        self.live += 1;

        match self.free.pop() {
            Some(id) => {
                debug_assert!(self.slots[id.0].is_none());
                self.slots[id.0] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    /// Takes a node out of the arena. The caller must have detached it from
    /// every chain first.
    pub fn release(&mut self, id: NodeId) -> Node<T> {
        let node = self.slots[id.0]
            .take()
            .unwrap_or_else(|| panic!("release of vacant node slot {}", id.0));
        self.free.push(id);
        self.live -= 1;
        node
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node<T> {
        match &self.slots[id.0] {
            Some(node) => node,
            None => panic!("access to vacant node slot {}", id.0),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match &mut self.slots[id.0] {
            Some(node) => node,
            None => panic!("access to vacant node slot {}", id.0),
        }
    }

    /// Number of allocated (not released) nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_get() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(11, "a");
        let b = arena.alloc(22, "b");

        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a).hash_code, 11);
        assert_eq!(arena.get(b).payload, "b");
        assert_eq!(arena.get(a).next, None);
    }

    #[test]
    fn test_release_reuses_slot() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(1, 10u32);
        let _b = arena.alloc(2, 20u32);

        let node = arena.release(a);
        assert_eq!(node.payload, 10);
        assert_eq!(arena.len(), 1);

        let c = arena.alloc(3, 30u32);
        assert_eq!(c.index(), a.index());
        assert_eq!(arena.get(c).payload, 30);
    }

    #[test]
    #[should_panic(expected = "vacant node slot")]
    fn test_double_release_panics() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(1, ());
        arena.release(a);
        arena.release(a);
    }
}
