//! Storage Module
//!
//! This module provides the key space for pollkv, built bottom-up:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │            get / set / delete over binary keys              │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        HMap<T>                              │
//! │   ┌────────────────┐             ┌────────────────┐         │
//! │   │ primary table  │ <── moves ──│ retiring table │         │
//! │   └────────────────┘             └────────────────┘         │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              NodeArena<T>  (chain nodes by id)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Chained buckets**: power-of-two tables indexed by `hash & mask`
//! - **Progressive rehashing**: resizes are spread over later operations
//! - **Index links**: chains are arena ids, not pointers
//!
//! ## Example
//!
//! ```
//! use pollkv::storage::{create_store, MapConfig, Store};
//! use bytes::Bytes;
//!
//! let mut store = create_store();
//! store.set(Bytes::from("name"), Bytes::from("pollkv"));
//! assert_eq!(store.get(b"name"), Some(Bytes::from("pollkv")));
//!
//! // Smaller migration chunks for latency-sensitive deployments
//! let tuned = Store::with_config(MapConfig {
//!     resize_chunk_size: 32,
//!     ..MapConfig::default()
//! });
//! assert!(tuned.is_empty());
//! ```

pub mod engine;
pub mod map;
pub mod node;
pub mod table;

// Re-export commonly used types
pub use engine::{create_store, Entry, StorageStats, Store};
pub use map::{HMap, MapConfig, MapStats};
pub use node::{Node, NodeArena, NodeId};
pub use table::{HashTable, Link};
