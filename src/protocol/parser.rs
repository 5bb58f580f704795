//! Streaming RESP Parser
//!
//! This module turns a byte stream into a sequence of [`Payload`]s, one per
//! complete frame, without buffering the whole stream.
//!
//! ## Design Philosophy
//!
//! 1. **Background decoding**: [`parse_stream`] spawns a Tokio task that owns
//!    the reader and decodes frames one at a time.
//! 2. **Rendezvous handoff**: The decoder does not start on the next frame
//!    until the consumer has received the previous payload, so a slow
//!    consumer stalls the decoder rather than letting results pile up.
//! 3. **Frame-scoped errors**: A malformed frame yields an error payload and
//!    decoding continues with the next line. End of stream and I/O failures
//!    yield one final error payload and end the sequence.
//!
//! ## Frame State Machine
//!
//! ```text
//! read line ──> shorter than 3 bytes or no CRLF? ──> skip, read next line
//!     │
//!     ├─ '+' ──> Status          ├─ '$' ──> Bulk (reads <len> + 2 bytes)
//!     ├─ '-' ──> Error           ├─ '*' ──> MultiBulk (<count> '$' frames)
//!     ├─ ':' ──> Integer         └─ else ─> InvalidHeader error
//! ```
//!
//! Lines that are too short or not CRLF-terminated are dropped without an
//! error payload. Existing clients rely on this leniency.

use crate::protocol::types::{prefix, Reply, CRLF};
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Errors that can occur while decoding a stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended cleanly between frames
    #[error("end of stream")]
    Eof,

    /// The underlying reader failed, or ended in the middle of a frame
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An integer frame whose body is not a valid i64
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Unknown type prefix byte
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A bulk string length that is not a number, or below -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(String),

    /// A multi-bulk count that is not a number, or negative
    #[error("invalid array header: {0}")]
    InvalidArrayHeader(String),

    /// A multi-bulk element that is not a `$` bulk string header
    #[error("invalid bulk string header: {0}")]
    InvalidBulkHeader(String),

    /// A bulk string larger than [`MAX_BULK_SIZE`]
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Returns true if the stream cannot continue after this error.
    ///
    /// Frame errors raised in the middle of a multi-bulk array return false
    /// here, but the stream position may no longer sit on a frame boundary.
    pub fn is_stream_error(&self) -> bool {
        matches!(self, ProtocolError::Eof | ProtocolError::Io(_))
    }
}

/// One decoded frame, or the reason it could not be decoded.
pub type Payload = Result<Reply, ProtocolError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Upper bound on the capacity pre-allocated for a multi-bulk array.
const MAX_PREALLOC_ELEMENTS: usize = 1024;

/// The receiving end of a stream being decoded by [`parse_stream`].
///
/// # Example
///
/// ```ignore
/// use shardkv::protocol::parse_stream;
///
/// let (reader, writer) = socket.into_split();
/// let mut payloads = parse_stream(reader);
/// while let Some(payload) = payloads.recv().await {
///     match payload {
///         Ok(reply) => println!("{}", reply),
///         Err(e) if e.is_stream_error() => break,
///         Err(e) => eprintln!("bad frame: {}", e),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct PayloadStream {
    rx: mpsc::Receiver<Payload>,
}

impl PayloadStream {
    /// Receives the next payload. Returns `None` once the decoder has
    /// finished, which is always right after a stream error unless the
    /// decoder faulted.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

/// Starts decoding `reader` in a background task.
///
/// A panic inside the decoder is logged and ends the sequence without a
/// final error payload; the consumer only sees [`PayloadStream::recv`]
/// returning `None`.
pub fn parse_stream<R>(reader: R) -> PayloadStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let decoder = tokio::spawn(decode_loop(BufReader::new(reader), tx));

    tokio::spawn(async move {
        if let Err(e) = decoder.await {
            if e.is_panic() {
                error!(error = %e, "protocol decoder faulted, closing stream");
            }
        }
    });

    PayloadStream { rx }
}

/// Decodes a single frame from an in-memory buffer.
///
/// # Example
///
/// ```
/// use shardkv::protocol::{parse_one, Reply};
///
/// # tokio_test::block_on(async {
/// let reply = parse_one(b"+OK\r\n").await.unwrap();
/// assert_eq!(reply, Reply::ok());
/// # });
/// ```
pub async fn parse_one(data: &[u8]) -> Payload {
    let mut reader = data;
    read_frame(&mut reader).await
}

async fn decode_loop<R>(mut reader: R, tx: mpsc::Sender<Payload>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let payload = tokio::select! {
            payload = read_frame(&mut reader) => payload,
            _ = tx.closed() => {
                trace!("payload consumer dropped, stopping decoder");
                return;
            }
        };
        let last = matches!(&payload, Err(e) if e.is_stream_error());

        if tx.send(payload).await.is_err() {
            trace!("payload consumer dropped, stopping decoder");
            return;
        }
        if last {
            return;
        }

        // The channel holds one payload; reserving its slot only succeeds once
        // the consumer has taken it, which keeps the decoder from running ahead.
        match tx.reserve().await {
            Ok(permit) => drop(permit),
            Err(_) => return,
        }
    }
}

/// Reads one line including its trailing `\n`.
async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(ProtocolError::Eof);
    }
    if line.last() != Some(&b'\n') {
        return Err(ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(line)
}

/// Reads the next complete frame, skipping malformed short lines.
async fn read_frame<R>(reader: &mut R) -> Payload
where
    R: AsyncBufRead + Unpin,
{
    let mut line = loop {
        let line = read_line(reader).await?;
        if line.len() <= 2 || !line.ends_with(CRLF) {
            trace!(len = line.len(), "skipping short or unterminated header line");
            continue;
        }
        break line;
    };
    line.truncate(line.len() - 2);

    let body = &line[1..];
    match line[0] {
        prefix::STATUS => Ok(Reply::Status(String::from_utf8_lossy(body).into_owned())),
        prefix::ERROR => Ok(Reply::Error(String::from_utf8_lossy(body).into_owned())),
        prefix::INTEGER => parse_i64(body)
            .map(Reply::Integer)
            .ok_or_else(|| ProtocolError::InvalidInteger(lossy(body))),
        prefix::BULK_STRING => read_bulk(reader, body).await,
        prefix::MULTI_BULK => read_multi_bulk(reader, body).await,
        _ => Err(ProtocolError::InvalidHeader(lossy(&line))),
    }
}

async fn read_bulk<R>(reader: &mut R, header: &[u8]) -> Payload
where
    R: AsyncBufRead + Unpin,
{
    let len = parse_i64(header).ok_or_else(|| ProtocolError::InvalidBulkLength(lossy(header)))?;
    match len {
        -1 => Ok(Reply::Bulk(None)),
        0 => Ok(Reply::Bulk(Some(Bytes::new()))),
        len if len < 0 => Err(ProtocolError::InvalidBulkLength(lossy(header))),
        len => Ok(Reply::Bulk(Some(read_body(reader, len).await?))),
    }
}

async fn read_multi_bulk<R>(reader: &mut R, header: &[u8]) -> Payload
where
    R: AsyncBufRead + Unpin,
{
    let count = match parse_i64(header) {
        Some(count) if count >= 0 => count as usize,
        _ => return Err(ProtocolError::InvalidArrayHeader(format!("*{}", lossy(header)))),
    };
    if count == 0 {
        return Ok(Reply::MultiBulk(Some(Vec::new())));
    }

    let mut values = Vec::with_capacity(count.min(MAX_PREALLOC_ELEMENTS));
    for _ in 0..count {
        let line = read_line(reader).await?;
        if line.len() < 4 || !line.ends_with(CRLF) || line[0] != prefix::BULK_STRING {
            return Err(ProtocolError::InvalidBulkHeader(lossy(&line)));
        }

        let header = &line[1..line.len() - 2];
        match parse_i64(header) {
            Some(-1) => values.push(None),
            Some(len) if len >= 0 => values.push(Some(read_body(reader, len).await?)),
            _ => return Err(ProtocolError::InvalidBulkLength(lossy(&line))),
        }
    }
    Ok(Reply::MultiBulk(Some(values)))
}

/// Reads `len` payload bytes plus the two terminator bytes that follow.
async fn read_body<R>(reader: &mut R, len: i64) -> Result<Bytes, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    if len > MAX_BULK_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    let mut body = vec![0u8; len + 2];
    reader.read_exact(&mut body).await?;
    body.truncate(len);
    Ok(Bytes::from(body))
}

fn parse_i64(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
