//! Fixed-Capacity Chained Hash Table
//!
//! A table is an array of chain heads whose length is always a power of two,
//! so the bucket of a node is `hash_code & mask`. Nodes themselves live in a
//! [`NodeArena`] owned by the caller; the table only rewrites links.
//!
//! [`HashTable::find`] returns the *link slot* that points at the match
//! rather than the node, so the caller can unlink it with
//! [`HashTable::detach`] without walking the chain a second time.

use super::node::{NodeArena, NodeId};

/// The cell that holds a reference to a node: either a bucket head or the
/// `next` field of the node's predecessor.
///
/// A link is only meaningful until the table or the arena is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Bucket(usize),
    Next(NodeId),
}

#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<Option<NodeId>>,
    mask: usize,
    count: usize,
}

impl Default for HashTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl HashTable {
    /// Creates a table with `capacity` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "hash table capacity must be a power of two, got {}",
            capacity
        );
        Self {
            buckets: vec![None; capacity],
            mask: capacity - 1,
            count: 0,
        }
    }

    /// A table with no buckets. Nothing can be inserted until it is replaced.
    pub fn empty() -> Self {
        Self {
            buckets: Vec::new(),
            mask: 0,
            count: 0,
        }
    }

    /// Number of buckets.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live nodes reachable from this table.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Prepends a detached node to its bucket chain.
    pub fn insert<T>(&mut self, nodes: &mut NodeArena<T>, id: NodeId) {
        debug_assert!(self.capacity() > 0, "insert into unallocated table");
        let node = nodes.get_mut(id);
        let pos = (node.hash_code as usize) & self.mask;
        node.next = self.buckets[pos];
        self.buckets[pos] = Some(id);
        self.count += 1;
    }

    /// Finds the link slot whose target has `hash_code` and satisfies `eq`.
    pub fn find<T, F>(&self, nodes: &NodeArena<T>, hash_code: u64, mut eq: F) -> Option<Link>
    where
        F: FnMut(&T) -> bool,
    {
        if self.buckets.is_empty() {
            return None;
        }

        let pos = (hash_code as usize) & self.mask;
        let mut link = Link::Bucket(pos);
        let mut cursor = self.buckets[pos];

        while let Some(id) = cursor {
            let node = nodes.get(id);
            if node.hash_code == hash_code && eq(&node.payload) {
                return Some(link);
            }
            link = Link::Next(id);
            cursor = node.next;
        }

        None
    }

    /// Returns the node a link currently points at.
    pub fn target<T>(&self, nodes: &NodeArena<T>, link: Link) -> Option<NodeId> {
        match link {
            Link::Bucket(pos) => self.buckets[pos],
            Link::Next(prev) => nodes.get(prev).next,
        }
    }

    /// Unlinks the node behind `link` and hands it back to the caller, still
    /// allocated in the arena.
    ///
    /// # Panics
    ///
    /// Panics if the link is empty, which means it went stale.
    pub fn detach<T>(&mut self, nodes: &mut NodeArena<T>, link: Link) -> NodeId {
        let id = self
            .target(nodes, link)
            .unwrap_or_else(|| panic!("detach through empty link {:?}", link));
        let next = nodes.get_mut(id).next.take();

        match link {
            Link::Bucket(pos) => self.buckets[pos] = next,
            Link::Next(prev) => nodes.get_mut(prev).next = next,
        }

        self.count -= 1;
        id
    }

    /// Whether bucket `pos` has no chain.
    #[inline]
    pub(crate) fn bucket_is_empty(&self, pos: usize) -> bool {
        self.buckets[pos].is_none()
    }
}
