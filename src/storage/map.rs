//! Progressive Rehashing Hash Map
//!
//! Resizing a large table in one go stalls every client for as long as it
//! takes to move every entry. [`HMap`] instead keeps two tables while a
//! resize is in flight and moves a bounded number of nodes on every call:
//!
//! ```text
//!   insert/lookup/remove
//!          │
//!          ▼
//!    help_resize() ── moves ≤ resize_chunk_size nodes ──┐
//!          │                                            │
//!          ▼                                            ▼
//!   ┌─────────────┐                          ┌──────────────────┐
//!   │  primary    │  <── new inserts         │  retiring        │
//!   │  2N buckets │                          │  N buckets       │
//!   └─────────────┘                          │  [0, cursor) = ∅ │
//!                                            └──────────────────┘
//! ```
//!
//! Work per call is bounded by *migrated nodes*, not by scanned buckets, so a
//! sparse retiring table cannot make one call expensive while the whole
//! table still drains in `retiring.len() / resize_chunk_size` calls.
//!
//! Key equality is not part of the node type: every lookup takes a hash code
//! and a predicate over the payload.

use super::node::{NodeArena, NodeId};
use super::table::{HashTable, Link};

/// Buckets allocated by the first insert.
pub const DEFAULT_INITIAL_CAPACITY: usize = 4;

/// Nodes migrated per call while a resize is in flight.
pub const DEFAULT_RESIZE_CHUNK_SIZE: usize = 128;

/// `len / capacity` (integer division) at which a resize starts.
pub const DEFAULT_MAX_LOAD_FACTOR: usize = 8;

/// Tuning knobs for [`HMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapConfig {
    /// Bucket count of the first table; must be a power of two.
    pub initial_capacity: usize,
    /// Upper bound on nodes moved by a single call.
    pub resize_chunk_size: usize,
    /// Load factor that triggers doubling.
    pub max_load_factor: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            resize_chunk_size: DEFAULT_RESIZE_CHUNK_SIZE,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
        }
    }
}

impl MapConfig {
    fn validate(&self) {
        assert!(
            self.initial_capacity.is_power_of_two(),
            "initial capacity must be a power of two, got {}",
            self.initial_capacity
        );
        assert!(self.resize_chunk_size > 0, "resize chunk size must be non-zero");
        assert!(self.max_load_factor > 0, "max load factor must be non-zero");
    }
}

/// Point-in-time view of the map's internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapStats {
    pub len: usize,
    pub primary_len: usize,
    pub primary_capacity: usize,
    pub retiring_len: usize,
    pub retiring_capacity: usize,
    pub migration_cursor: usize,
    pub resizing: bool,
}

/// A chained hash map over arena nodes that resizes incrementally.
#[derive(Debug)]
pub struct HMap<T> {
    nodes: NodeArena<T>,
    primary: HashTable,
    retiring: Option<HashTable>,
    migration_cursor: usize,
    config: MapConfig,
}

impl<T> Default for HMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HMap<T> {
    pub fn new() -> Self {
        Self::with_config(MapConfig::default())
    }

    /// # Panics
    ///
    /// Panics if the config is invalid (see [`MapConfig`]).
    pub fn with_config(config: MapConfig) -> Self {
        config.validate();
        Self {
            nodes: NodeArena::new(),
            primary: HashTable::empty(),
            retiring: None,
            migration_cursor: 0,
            config,
        }
    }

    /// Total number of entries across both tables.
    pub fn len(&self) -> usize {
        self.primary.len() + self.retiring.as_ref().map_or(0, HashTable::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_resizing(&self) -> bool {
        self.retiring.is_some()
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn stats(&self) -> MapStats {
        MapStats {
            len: self.len(),
            primary_len: self.primary.len(),
            primary_capacity: self.primary.capacity(),
            retiring_len: self.retiring.as_ref().map_or(0, HashTable::len),
            retiring_capacity: self.retiring.as_ref().map_or(0, HashTable::capacity),
            migration_cursor: self.migration_cursor,
            resizing: self.retiring.is_some(),
        }
    }

    /// Inserts a new entry. Does not check for an existing equal key; use
    /// [`HMap::lookup_mut`] first to overwrite in place.
    pub fn insert(&mut self, hash_code: u64, payload: T) {
        if self.primary.capacity() == 0 {
            self.primary = HashTable::with_capacity(self.config.initial_capacity);
        }

        let id = self.nodes.alloc(hash_code, payload);
        self.primary.insert(&mut self.nodes, id);

        if self.retiring.is_none() {
            let load_factor = self.primary.len() / self.primary.capacity();
            if load_factor >= self.config.max_load_factor {
                self.start_resize();
            }
        }

        self.help_resize();
    }

    /// Finds the entry with `hash_code` that satisfies `eq`.
    pub fn lookup<F>(&mut self, hash_code: u64, eq: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        let id = self.find(hash_code, eq)?;
        Some(&self.nodes.get(id).payload)
    }

    /// Like [`HMap::lookup`], but allows updating the payload in place. The
    /// update must not change what the entry hashes to.
    pub fn lookup_mut<F>(&mut self, hash_code: u64, eq: F) -> Option<&mut T>
    where
        F: FnMut(&T) -> bool,
    {
        let id = self.find(hash_code, eq)?;
        Some(&mut self.nodes.get_mut(id).payload)
    }

    /// Removes and returns the matching entry, if any.
    pub fn remove<F>(&mut self, hash_code: u64, mut eq: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.help_resize();

        if let Some(link) = self.primary.find(&self.nodes, hash_code, &mut eq) {
            let id = self.primary.detach(&mut self.nodes, link);
            return Some(self.nodes.release(id).payload);
        }

        let retiring = self.retiring.as_mut()?;
        let link = retiring.find(&self.nodes, hash_code, &mut eq)?;
        let id = retiring.detach(&mut self.nodes, link);
        if retiring.is_empty() {
            self.retiring = None;
            self.migration_cursor = 0;
        }
        Some(self.nodes.release(id).payload)
    }

    fn find<F>(&mut self, hash_code: u64, mut eq: F) -> Option<NodeId>
    where
        F: FnMut(&T) -> bool,
    {
        self.help_resize();

        if let Some(link) = self.primary.find(&self.nodes, hash_code, &mut eq) {
            return self.primary.target(&self.nodes, link);
        }

        let retiring = self.retiring.as_ref()?;
        let link = retiring.find(&self.nodes, hash_code, &mut eq)?;
        retiring.target(&self.nodes, link)
    }

    /// Moves up to `resize_chunk_size` nodes from the retiring table into
    /// the primary one. Returns how many nodes were moved.
    pub fn help_resize(&mut self) -> usize {
        let Some(retiring) = self.retiring.as_mut() else {
            return 0;
        };

        let mut moved = 0;
        while moved < self.config.resize_chunk_size && !retiring.is_empty() {
            let pos = self.migration_cursor;
            if retiring.bucket_is_empty(pos) {
                self.migration_cursor += 1;
                continue;
            }

            let id = retiring.detach(&mut self.nodes, Link::Bucket(pos));
            self.primary.insert(&mut self.nodes, id);
            moved += 1;
        }

        if retiring.is_empty() {
            self.retiring = None;
            self.migration_cursor = 0;
        }

        moved
    }

    fn start_resize(&mut self) {
        assert!(
            self.retiring.is_none(),
            "resize started while another one is in flight"
        );

        let doubled = self.primary.capacity() * 2;
        let old = std::mem::replace(&mut self.primary, HashTable::with_capacity(doubled));
        self.retiring = Some(old);
        self.migration_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deliberately weak so that chains get long and tests hit collisions.
    fn hash(key: u64) -> u64 {
        key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 7
    }

    fn insert_key(map: &mut HMap<(u64, u64)>, key: u64, value: u64) {
        match map.lookup_mut(hash(key), |&(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => map.insert(hash(key), (key, value)),
        }
    }

    fn get(map: &mut HMap<(u64, u64)>, key: u64) -> Option<u64> {
        map.lookup(hash(key), |&(k, _)| k == key).map(|&(_, v)| v)
    }

    fn small_chunks() -> MapConfig {
        MapConfig {
            initial_capacity: 4,
            resize_chunk_size: 3,
            max_load_factor: 2,
        }
    }

    #[test]
    fn test_round_trip_across_sizes() {
        for n in [1u64, 3, 4, 32, 33, 1_000, 50_000] {
            let mut map = HMap::new();
            for key in 0..n {
                insert_key(&mut map, key, key * 10);
            }
            // Overwrite a few so the last write wins.
            for key in (0..n).step_by(7) {
                insert_key(&mut map, key, key + 1);
            }

            assert_eq!(map.len(), n as usize);
            for key in 0..n {
                let expected = if key % 7 == 0 { key + 1 } else { key * 10 };
                assert_eq!(get(&mut map, key), Some(expected), "n = {}, key = {}", n, key);
            }
            assert_eq!(get(&mut map, n + 1), None);
        }
    }

    #[test]
    fn test_first_insert_allocates_initial_capacity() {
        let mut map = HMap::new();
        assert_eq!(map.stats().primary_capacity, 0);

        insert_key(&mut map, 1, 1);
        assert_eq!(map.stats().primary_capacity, DEFAULT_INITIAL_CAPACITY);
        assert!(!map.is_resizing());
    }

    #[test]
    fn test_resize_triggers_at_load_factor() {
        let mut map = HMap::with_config(MapConfig {
            resize_chunk_size: 1,
            ..MapConfig::default()
        });

        // 4 buckets * load factor 8 = 32 entries trigger the first resize.
        for key in 0..31 {
            insert_key(&mut map, key, key);
        }
        assert!(!map.is_resizing());
        assert_eq!(map.stats().primary_capacity, 4);

        insert_key(&mut map, 31, 31);
        let stats = map.stats();
        assert!(stats.resizing);
        assert_eq!(stats.primary_capacity, 8);
        assert_eq!(stats.retiring_capacity, 4);
        assert_eq!(stats.len, 32);
    }

    #[test]
    fn test_migration_is_bounded_per_call() {
        let config = small_chunks();
        let mut map = HMap::with_config(config);
        let mut saw_resize = false;

        // Fresh keys, so each step is exactly one `insert` call.
        for key in 0..2_000u64 {
            let before = map.stats();
            map.insert(hash(key), (key, key));
            let after = map.stats();

            if before.resizing && after.resizing {
                // Same resize still in flight: only migrated nodes leave it.
                assert!(before.retiring_len - after.retiring_len <= config.resize_chunk_size);
                saw_resize = true;
            }

            // Every key inserted so far stays reachable mid-resize.
            if key % 97 == 0 {
                for probe in 0..=key {
                    assert_eq!(get(&mut map, probe), Some(probe));
                }
            }
        }

        assert!(saw_resize);
    }

    #[test]
    fn test_remove_and_lookup_migration_is_bounded() {
        let config = small_chunks();
        let mut map = HMap::with_config(config);

        let mut next = 0u64;
        while !(map.is_resizing() && map.stats().retiring_len >= 60) {
            map.insert(hash(next), (next, next));
            next += 1;
        }

        let mut removed = std::collections::HashSet::new();
        let mut key = 0u64;
        while map.is_resizing() {
            // remove: migrated nodes plus possibly the removed one leave
            // the retiring table; only migrated nodes enter the primary.
            let before = map.stats();
            assert_eq!(map.remove(hash(key), |&(k, _)| k == key), Some((key, key)));
            let after = map.stats();
            assert!(before.retiring_len - after.retiring_len <= config.resize_chunk_size + 1);
            assert!(after.primary_len <= before.primary_len + config.resize_chunk_size);
            assert_eq!(after.len, before.len - 1);
            removed.insert(key);

            if !map.is_resizing() {
                break;
            }

            let before = map.stats();
            assert_eq!(get(&mut map, key + 1), Some(key + 1));
            let after = map.stats();
            assert!(before.retiring_len - after.retiring_len <= config.resize_chunk_size);

            key += 2;
        }

        for k in 0..next {
            let expected = if removed.contains(&k) { None } else { Some(k) };
            assert_eq!(get(&mut map, k), expected, "key {}", k);
        }
    }

    #[test]
    fn test_lookup_drives_migration() {
        let config = small_chunks();
        let mut map = HMap::with_config(config);

        let mut key = 0;
        while !map.is_resizing() {
            insert_key(&mut map, key, key);
            key += 1;
        }

        let retiring = map.stats().retiring_len;
        let expected_calls = retiring.div_ceil(config.resize_chunk_size);

        let mut calls = 0;
        while map.is_resizing() {
            let before = map.stats().retiring_len;
            assert_eq!(get(&mut map, 0), Some(0));
            let after = map.stats().retiring_len;
            assert!(before - after <= config.resize_chunk_size);
            calls += 1;
        }

        assert_eq!(calls, expected_calls);
        assert_eq!(map.stats().migration_cursor, 0);
        assert_eq!(map.stats().retiring_capacity, 0);
        for probe in 0..key {
            assert_eq!(get(&mut map, probe), Some(probe));
        }
    }

    #[test]
    fn test_cursor_only_passes_empty_buckets() {
        let mut map = HMap::with_config(small_chunks());
        let mut key = 0;
        while !map.is_resizing() {
            insert_key(&mut map, key, key);
            key += 1;
        }

        while map.is_resizing() {
            let cursor = map.migration_cursor;
            if let Some(retiring) = map.retiring.as_ref() {
                for pos in 0..cursor {
                    assert!(retiring.bucket_is_empty(pos));
                }
            }
            map.help_resize();
        }
    }

    #[test]
    fn test_load_factor_bound_after_resize() {
        let mut map = HMap::new();
        for key in 0..100_000u64 {
            insert_key(&mut map, key, key);
        }
        while map.is_resizing() {
            map.help_resize();
        }

        let stats = map.stats();
        assert!(stats.primary_len / stats.primary_capacity < DEFAULT_MAX_LOAD_FACTOR);
    }

    #[test]
    fn test_remove_absent_is_idempotent() {
        let mut map = HMap::new();
        insert_key(&mut map, 1, 100);

        assert_eq!(map.remove(hash(2), |&(k, _)| k == 2), None);
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(hash(1), |&(k, _)| k == 1), Some((1, 100)));
        assert_eq!(map.len(), 0);
        assert_eq!(map.remove(hash(1), |&(k, _)| k == 1), None);
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_remove_during_resize_hits_both_tables() {
        let mut map = HMap::with_config(MapConfig {
            resize_chunk_size: 1,
            ..MapConfig::default()
        });
        for key in 0..32 {
            insert_key(&mut map, key, key);
        }
        assert!(map.is_resizing());

        for key in 0..32 {
            assert_eq!(map.remove(hash(key), |&(k, _)| k == key), Some((key, key)));
        }
        assert!(map.is_empty());

        // Draining the last node retires the old table.
        assert!(!map.is_resizing());
    }

    #[test]
    fn test_equality_comes_from_caller() {
        // Two payloads with the same hash code are told apart only by `eq`.
        let mut map: HMap<&str> = HMap::new();
        map.insert(42, "left");
        map.insert(42, "right");

        assert_eq!(map.lookup(42, |s| *s == "right"), Some(&"right"));
        assert_eq!(map.lookup(42, |s| *s == "left"), Some(&"left"));
        assert_eq!(map.lookup(42, |s| *s == "middle"), None);
    }

    #[test]
    #[should_panic(expected = "another one is in flight")]
    fn test_double_resize_panics() {
        let mut map: HMap<u8> = HMap::new();
        map.insert(1, 1);
        map.start_resize();
        map.start_resize();
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_invalid_initial_capacity_panics() {
        let _: HMap<u8> = HMap::with_config(MapConfig {
            initial_capacity: 3,
            ..MapConfig::default()
        });
    }
}
