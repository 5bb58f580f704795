//! RESP Reply Values
//!
//! This module defines the values exchanged over the wire and their exact
//! byte encodings.
//!
//! ## Protocol Format
//!
//! Each value starts with a type prefix byte and ends with CRLF:
//! - `+` Status
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Multi-Bulk (an array of bulk strings)
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Null Bulk String: `$-1\r\n`
//! Multi-Bulk: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const MULTI_BULK: u8 = b'*';
}

/// A protocol value.
///
/// Bulk strings and multi-bulk arrays distinguish absent (`None`) from empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Non binary-safe status line.
    /// Format: `+<text>\r\n`
    Status(String),

    /// Error line.
    /// Format: `-<message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string, or null.
    /// Format: `$<length>\r\n<data>\r\n`, null is `$-1\r\n`
    Bulk(Option<Bytes>),

    /// Array of bulk strings, any of which may be null.
    /// Format: `*<count>\r\n<bulk>...`; both null and empty encode as `*0\r\n`
    MultiBulk(Option<Vec<Option<Bytes>>>),
}

impl Reply {
    /// Creates a status reply.
    ///
    /// # Example
    /// ```
    /// use shardkv::protocol::types::Reply;
    /// assert_eq!(Reply::status("OK").serialize(), b"+OK\r\n");
    /// ```
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use shardkv::protocol::types::Reply;
    /// let err = Reply::error("ERR unknown command");
    /// assert!(err.is_error());
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a present bulk string reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn null_bulk() -> Self {
        Reply::Bulk(None)
    }

    pub fn empty_bulk() -> Self {
        Reply::Bulk(Some(Bytes::new()))
    }

    /// Creates a multi-bulk reply from present elements.
    pub fn multi_bulk<I, B>(values: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Reply::MultiBulk(Some(values.into_iter().map(|v| Some(v.into())).collect()))
    }

    pub fn empty_multi_bulk() -> Self {
        Reply::MultiBulk(Some(Vec::new()))
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Common response for PING
    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// Encodes the value to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => serialize_bulk(data.as_deref(), buf),
            Reply::MultiBulk(values) => {
                let values = values.as_deref().unwrap_or_default();
                buf.push(prefix::MULTI_BULK);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    serialize_bulk(value.as_deref(), buf);
                }
            }
        }
    }

    /// Returns true if this value is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns true for a null bulk string or null multi-bulk.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::MultiBulk(None))
    }

    /// Attempts to extract the inner bytes of a present bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract the elements of a multi-bulk reply.
    pub fn as_multi_bulk(&self) -> Option<&[Option<Bytes>]> {
        match self {
            Reply::MultiBulk(values) => Some(values.as_deref().unwrap_or_default()),
            _ => None,
        }
    }
}

fn serialize_bulk(data: Option<&[u8]>, buf: &mut Vec<u8>) {
    buf.push(prefix::BULK_STRING);
    match data {
        Some(data) => {
            buf.extend_from_slice(data.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(data);
            buf.extend_from_slice(CRLF);
        }
        None => {
            buf.extend_from_slice(b"-1");
            buf.extend_from_slice(CRLF);
        }
    }
}

/// Returns true if `encoded` is the wire form of an error reply.
pub fn is_error_reply(encoded: &[u8]) -> bool {
    encoded.first() == Some(&prefix::ERROR)
}

impl From<Bytes> for Reply {
    fn from(data: Bytes) -> Self {
        Reply::Bulk(Some(data))
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Reply::Integer(n)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn bulk(f: &mut fmt::Formatter<'_>, data: &Option<Bytes>) -> fmt::Result {
            match data {
                None => write!(f, "(nil)"),
                Some(data) => match std::str::from_utf8(data) {
                    Ok(s) => write!(f, "\"{}\"", s),
                    Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
                },
            }
        }

        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => bulk(f, data),
            Reply::MultiBulk(values) => {
                let values = values.as_deref().unwrap_or_default();
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) ", i + 1)?;
                    bulk(f, v)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialize() {
        assert_eq!(Reply::status("OK").serialize(), b"+OK\r\n");
        assert_eq!(Reply::ok().serialize(), b"+OK\r\n");
        assert_eq!(Reply::pong().serialize(), b"+PONG\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = Reply::error("ERR unknown command");
        assert_eq!(value.serialize(), b"-ERR unknown command\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Reply::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(
            Reply::integer(i64::MIN).serialize(),
            b":-9223372036854775808\r\n"
        );
    }

    #[test]
    fn test_bulk_serialize() {
        assert_eq!(Reply::bulk("hello").serialize(), b"$5\r\nhello\r\n");
        assert_eq!(Reply::null_bulk().serialize(), b"$-1\r\n");
        assert_eq!(Reply::empty_bulk().serialize(), b"$0\r\n\r\n");
        assert_eq!(
            Reply::bulk(&b"a\r\nb"[..]).serialize(),
            b"$4\r\na\r\nb\r\n"
        );
    }

    #[test]
    fn test_multi_bulk_serialize() {
        let value = Reply::multi_bulk(["GET", "name"]);
        assert_eq!(value.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }

    #[test]
    fn test_multi_bulk_null_element() {
        let value = Reply::MultiBulk(Some(vec![Some(Bytes::from("a")), None]));
        assert_eq!(value.serialize(), b"*2\r\n$1\r\na\r\n$-1\r\n");
    }

    #[test]
    fn test_multi_bulk_empty_and_null() {
        assert_eq!(Reply::empty_multi_bulk().serialize(), b"*0\r\n");
        assert_eq!(Reply::MultiBulk(None).serialize(), b"*0\r\n");
    }

    #[test]
    fn test_is_error_reply() {
        assert!(is_error_reply(&Reply::error("ERR x").serialize()));
        assert!(!is_error_reply(&Reply::ok().serialize()));
        assert!(!is_error_reply(&Reply::integer(-1).serialize()));
        assert!(!is_error_reply(b""));
    }

    #[test]
    fn test_accessors() {
        assert!(Reply::null_bulk().is_null());
        assert!(Reply::MultiBulk(None).is_null());
        assert!(!Reply::empty_bulk().is_null());
        assert!(!Reply::empty_multi_bulk().is_null());

        assert_eq!(Reply::bulk("v").as_bytes(), Some(&b"v"[..]));
        assert_eq!(Reply::null_bulk().as_bytes(), None);
        assert_eq!(Reply::status("v").as_bytes(), None);

        assert_eq!(Reply::integer(-9).as_integer(), Some(-9));
        assert_eq!(Reply::bulk("9").as_integer(), None);

        let array = Reply::MultiBulk(Some(vec![Some(Bytes::from("a")), None]));
        assert_eq!(
            array.as_multi_bulk(),
            Some(&[Some(Bytes::from("a")), None][..])
        );
        assert_eq!(Reply::MultiBulk(None).as_multi_bulk(), Some(&[][..]));
        assert_eq!(Reply::ok().as_multi_bulk(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Reply::null_bulk().to_string(), "(nil)");
        assert_eq!(Reply::integer(3).to_string(), "(integer) 3");
        assert_eq!(
            Reply::multi_bulk(["a", "b"]).to_string(),
            "1) \"a\"\n2) \"b\""
        );
    }
}
