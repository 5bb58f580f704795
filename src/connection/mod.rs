//! Connection Handler Module
//!
//! This module manages individual client connections. Each connection runs
//! in its own task with a protocol decoder feeding it frames.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Server (server.rs)                      │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() + spawn
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read half   │───>│ parse_stream│───>│ Echo frame  │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Write half  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The handler echoes every decoded frame back to the client in its
//! canonical encoding. It stands in for a command dispatcher.
//!
//! ## Example
//!
//! ```ignore
//! use shardkv::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! let stats = Arc::new(ConnectionStats::new());
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, stats, shutdown_rx));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
