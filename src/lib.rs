//! # pollkv - A Single-Threaded In-Memory Key-Value Server
//!
//! pollkv serves an in-memory key space over a length-prefixed binary
//! protocol. One thread multiplexes every client with readiness-based,
//! non-blocking I/O, and the key space lives in a chained hash map that
//! resizes incrementally so no single request pays for a full rehash.
//!
//! ## Features
//!
//! - **Progressive rehashing**: a resize moves a bounded number of entries
//!   per operation instead of stopping the world
//! - **Readiness-driven I/O**: a single `mio` poller, no threads, no locks
//! - **Pipelining**: many requests in one read are answered in order
//! - **Binary safe**: keys and values are arbitrary bytes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              pollkv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ Event Loop  │───>│ Connection  │───>│  Command    │                  │
//! │  │  (mio)      │    │ state mach. │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │   Frame     │    │            Store             │ │
//! │                     │   Parser    │    │  ┌────────────┐ ┌──────────┐ │ │
//! │                     └─────────────┘    │  │  primary   │ │ retiring │ │ │
//! │                                        │  │  table     │<│  table   │ │ │
//! │                                        │  └────────────┘ └──────────┘ │ │
//! │                                        └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use pollkv::{create_store, run_event_loop};
//! use std::net::TcpListener;
//!
//! fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:1234")?;
//!     // Blocks until the poller fails
//!     run_event_loop(listener, create_store())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `GET key`
//! - `SET key value`
//! - `DEL key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame types, encoding and the incremental decoder
//! - [`storage`]: the store and the progressively rehashing hash map
//! - [`commands`]: maps requests onto the store
//! - [`connection`]: per-client read/write state machine
//! - [`server`]: the event loop
//! - [`client`]: a blocking client for tools and tests
//!
//! ## Design Highlights
//!
//! ### Index-Linked Chains
//!
//! Chain nodes live in an arena and link to each other by index. Buckets
//! hold head indices, so moving an entry between tables never touches the
//! entry itself.
//!
//! ### Bounded Buffers
//!
//! Each connection owns one read and one write buffer of
//! `4 + max_message_size` bytes. A frame announcing a larger payload closes
//! the connection before any of it is buffered.

pub mod client;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::CommandHandler;
pub use connection::{ConnState, Connection, ConnectionError, ConnectionStats};
pub use protocol::{FrameError, FrameParser, Request, Response, Status};
pub use server::{run_event_loop, run_event_loop_with_config, EventLoop, ServerConfig};
pub use storage::{create_store, HMap, MapConfig, Store};

/// The default port pollkv listens on
pub const DEFAULT_PORT: u16 = 1234;

/// The default host pollkv binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of pollkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
