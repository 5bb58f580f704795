//! Storage Module
//!
//! The storage primitive every command is built on: a sharded, thread-safe
//! dictionary with single-key operations, weakly consistent traversal,
//! cursor-based pattern scans, and an ordered multi-key locking protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ConcurrentDict<V>                        │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ ...2^k  │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲ single-key ops lock one shard
//!          ▲ rw_locks() locks many, in ascending index order
//! ```
//!
//! ## Example
//!
//! ```
//! use shardkv::storage::{ConcurrentDict, ScanCursor};
//! use bytes::Bytes;
//!
//! let dict = ConcurrentDict::new(64);
//! dict.put(Bytes::from("user:1"), Bytes::from("Ariz"));
//! dict.put(Bytes::from("user:2"), Bytes::from("Sam"));
//!
//! let (keys, cursor) = dict.dict_scan(0, 10, "user:?");
//! assert_eq!(keys.len(), 2);
//! assert_eq!(cursor, ScanCursor::Done);
//! ```

pub mod dict;
pub mod locks;

pub use dict::{fnv32, ConcurrentDict, ScanCursor, MAX_SHARD_COUNT, MIN_SHARD_COUNT};
pub use locks::ShardLocks;
