//! Connection Handler Module
//!
//! This module holds the per-client state machine. Every connection is
//! driven by the single-threaded event loop in [`crate::server`]; nothing
//! here ever blocks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Event Loop                              │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ readiness event
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Connection::step                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Fill buffer │───>│ Parse frame │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │         ▲                                     │             │
//! │         │                                     ▼             │
//! │         │                            ┌─────────────┐        │
//! │         └────────────────────────────│ Flush resp  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking**: every read and write stops at `WouldBlock`
//! - **Pipelining**: multiple frames in a single read are answered in order
//! - **Bounded buffers**: one frame of `4 + max_message_size` bytes each way
//! - **Statistics**: tracks connection and command counters
//!
//! ## Example
//!
//! ```
//! use pollkv::commands::CommandHandler;
//! use pollkv::connection::{ConnState, Connection, ConnectionStats};
//! use pollkv::protocol::{Request, MAX_MESSAGE_SIZE};
//! use pollkv::storage::Store;
//! use std::io::Cursor;
//!
//! // Any Read + Write stream works; a Cursor reports EOF when drained.
//! let input = Request::from_parts(["set", "k", "v"]).encode().to_vec();
//! let stream = Cursor::new(input);
//! let addr = "127.0.0.1:5000".parse().unwrap();
//!
//! let mut conn = Connection::new(stream, addr, MAX_MESSAGE_SIZE);
//! let mut handler = CommandHandler::new(Store::new());
//! let mut stats = ConnectionStats::new();
//!
//! assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Closing);
//! assert_eq!(handler.store().len(), 1);
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{ConnState, Connection, ConnectionError, ConnectionStats};
