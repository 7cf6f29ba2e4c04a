//! Key-Value Store
//!
//! [`Store`] is the key space the server exposes: binary keys mapped to
//! binary values, backed by the progressively rehashing [`HMap`].
//!
//! ## Design Decisions
//!
//! 1. **Single owner**: the event loop owns the store and hands `&mut Store`
//!    to the command layer. There is no global map and no lock.
//! 2. **Stable hash codes**: a key is hashed once when its entry is created;
//!    the code travels with the node across resizes.
//! 3. **Read paths mutate**: `get` takes `&mut self` because every lookup also
//!    advances an in-flight resize.

use super::map::{HMap, MapConfig, MapStats};
use bytes::Bytes;
use std::hash::{DefaultHasher, Hash, Hasher};

/// A stored key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Bytes,
    pub value: Bytes,
}

/// Operation counters for a [`Store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
}

/// The in-memory key space.
///
/// # Example
///
/// ```
/// use pollkv::storage::Store;
/// use bytes::Bytes;
///
/// let mut store = Store::new();
/// store.set(Bytes::from("name"), Bytes::from("pollkv"));
/// assert_eq!(store.get(b"name"), Some(Bytes::from("pollkv")));
/// assert!(store.delete(b"name"));
/// assert_eq!(store.get(b"name"), None);
/// ```
#[derive(Debug, Default)]
pub struct Store {
    map: HMap<Entry>,
    get_count: u64,
    set_count: u64,
    del_count: u64,
}

/// Creates an empty store with default map tuning.
pub fn create_store() -> Store {
    Store::new()
}

impl Store {
    pub fn new() -> Self {
        Self::with_config(MapConfig::default())
    }

    pub fn with_config(config: MapConfig) -> Self {
        Self {
            map: HMap::with_config(config),
            get_count: 0,
            set_count: 0,
            del_count: 0,
        }
    }

    #[inline]
    fn hash_key(key: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Sets a key-value pair, overwriting any previous value.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(&mut self, key: Bytes, value: Bytes) -> bool {
        self.set_count += 1;

        let hash_code = Self::hash_key(&key);
        if let Some(entry) = self.map.lookup_mut(hash_code, |e| e.key == key) {
            entry.value = value;
            return false;
        }

        self.map.insert(hash_code, Entry { key, value });
        true
    }

    /// Gets the value for a key, or `None` if the key is absent.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        self.get_count += 1;

        let hash_code = Self::hash_key(key);
        self.map
            .lookup(hash_code, |e| e.key == key)
            .map(|e| e.value.clone())
    }

    /// Deletes a key.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.del_count += 1;

        let hash_code = Self::hash_key(key);
        self.map.remove(hash_code, |e| e.key == key).is_some()
    }

    /// Returns the number of keys in the store.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.map.len() as u64,
            get_ops: self.get_count,
            set_ops: self.set_count,
            del_ops: self.del_count,
        }
    }

    /// Internals of the backing map, mostly useful to watch a resize.
    pub fn map_stats(&self) -> MapStats {
        self.map.stats()
    }
}
