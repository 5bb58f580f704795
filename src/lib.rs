//! # shardkv - Storage and Protocol Core for a Redis-Compatible Server
//!
//! shardkv provides the two subsystems every command of an in-memory,
//! Redis-style key-value server is built on:
//!
//! - **Sharded concurrent dictionary**: a fixed table of independently
//!   `RwLock`ed shards with single-key operations, weakly consistent
//!   traversal, cursor-based pattern scans, and a deadlock-free protocol for
//!   locking many keys at once.
//! - **Streaming RESP codec**: a background decoder that turns a byte stream
//!   into one payload per frame, and exact encoders for every reply type.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │ TCP Server  │───>│ Connection  │───>│   (command dispatcher,       │ │
//! │  │ (Listener)  │    │  Handler    │    │    not part of this crate)   │ │
//! │  └─────────────┘    └──────┬──────┘    └──────────────┬───────────────┘ │
//! │                            │                          │                 │
//! │                            ▼                          ▼                 │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │ RESP parser │    │       ConcurrentDict         │ │
//! │                     │ + Reply     │    │  ┌───────┐┌───────┐┌──────┐  │ │
//! │                     │   encoder   │    │  │Shard 0││Shard 1││...N  │  │ │
//! │                     └─────────────┘    │  └───────┘└───────┘└──────┘  │ │
//! │                                        └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use shardkv::server::Server;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8888").await?;
//!     Server::new(listener)
//!         .run(async { tokio::signal::ctrl_c().await.ok(); })
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Sharded dictionary and multi-key locking
//! - [`protocol`]: RESP reply types, encoder and streaming parser
//! - [`wildcard`]: Glob patterns used by key scans
//! - [`connection`]: Per-client echo handler
//! - [`server`]: Accept loop with graceful shutdown

pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod wildcard;

// Re-export commonly used types for convenience
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{parse_one, parse_stream, Payload, ProtocolError, Reply};
pub use server::Server;
pub use storage::{ConcurrentDict, ScanCursor, ShardLocks};
pub use wildcard::{Pattern, PatternError};

/// The default port the server listens on
pub const DEFAULT_PORT: u16 = 8888;

/// The default host the server binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of shardkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
