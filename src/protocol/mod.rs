//! RESP Protocol Implementation
//!
//! This module provides the wire codec for the Redis Serialization Protocol.
//!
//! ## Modules
//!
//! - `types`: Defines the `Reply` enum and its byte encodings
//! - `parser`: Streaming decoder producing one `Payload` per frame
//!
//! ## Example
//!
//! ```ignore
//! use shardkv::protocol::{parse_stream, Reply};
//!
//! // Decoding a connection
//! let mut payloads = parse_stream(reader);
//! while let Some(payload) = payloads.recv().await { /* ... */ }
//!
//! // Creating responses
//! let response = Reply::bulk("Ariz");
//! let bytes = response.serialize();
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_one, parse_stream, Payload, PayloadStream, ProtocolError, MAX_BULK_SIZE};
pub use types::{is_error_reply, Reply};
