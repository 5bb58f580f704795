//! Per-Connection Echo Handler
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Server accepts a TCP connection
//!        │
//!        ▼
//! 2. Socket is split; the read half goes to parse_stream()
//!        │
//!        ▼
//! 3. Main loop:
//!    ┌──────────────────────────────┐
//!    │ Receive payload              │
//!    │   Ok(reply)   -> echo reply  │
//!    │   frame error -> -ERR reply  │
//!    │   stream end  -> stop        │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects, stream error, or server shutdown
//!        │
//!        ▼
//! 5. Handler task ends
//! ```

use crate::protocol::{parse_stream, PayloadStream, ProtocolError, Reply};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total frames decoded and answered
    pub frames_processed: AtomicU64,
    /// Total frames rejected as malformed
    pub frame_errors: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn frame_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_error(&self) {
        self.frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// Write half of the TCP stream
    writer: BufWriter<OwnedWriteHalf>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Frames decoded from the read half
    payloads: PayloadStream,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Flips to `true` when the server is shutting down
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    /// Creates a new connection handler and starts decoding the stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        let (reader, writer) = stream.into_split();
        Self {
            writer: BufWriter::new(writer),
            addr,
            payloads: parse_stream(reader),
            stats,
            shutdown,
        }
    }

    /// Runs the main connection loop until the client goes away, the stream
    /// fails, or the server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let payload = tokio::select! {
                payload = self.payloads.recv() => payload,
                _ = self.shutdown.changed() => {
                    debug!(client = %self.addr, "Server shutting down, closing connection");
                    return Ok(());
                }
            };

            match payload {
                Some(Ok(reply)) => {
                    trace!(client = %self.addr, frame = %reply, "Decoded frame");
                    self.stats.frame_processed();
                    self.send_reply(&reply).await?;
                }
                Some(Err(ProtocolError::Eof)) => return Ok(()),
                Some(Err(e)) if e.is_stream_error() => return Err(ConnectionError::Protocol(e)),
                Some(Err(e)) => {
                    debug!(client = %self.addr, error = %e, "Malformed frame");
                    self.stats.frame_error();
                    self.send_reply(&Reply::error(format!("ERR Protocol error: {}", e)))
                        .await?;
                }
                // Decoder faulted; it already logged why
                None => return Err(ConnectionError::DecoderClosed),
            }
        }
    }

    /// Sends a reply to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent reply"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error writing to the client
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The read side of the stream failed
    #[error("Protocol stream error: {0}")]
    Protocol(ProtocolError),

    /// The decoder stopped without reporting a stream error
    #[error("Protocol decoder closed unexpectedly")]
    DecoderClosed,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(stream, addr, stats, shutdown);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, stats, shutdown_rx.clone()));
            }
        });

        (addr, stats, shutdown_tx)
    }

    async fn read_exactly(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_echo_multi_bulk() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let frame = b"*2\r\n$4\r\nPING\r\n$-1\r\n";
        client.write_all(frame).await.unwrap();

        assert_eq!(read_exactly(&mut client, frame.len()).await, frame);
    }

    #[tokio::test]
    async fn test_pipelined_frames() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"+OK\r\n:42\r\n$5\r\nhello\r\n")
            .await
            .unwrap();

        let expected = b"+OK\r\n:42\r\n$5\r\nhello\r\n";
        assert_eq!(read_exactly(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_reply() {
        let (addr, stats, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b":abc\r\n+OK\r\n").await.unwrap();

        let expected = b"-ERR Protocol error: invalid integer: abc\r\n+OK\r\n";
        assert_eq!(read_exactly(&mut client, expected.len()).await, expected);
        assert_eq!(stats.frame_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats, _shutdown) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"+PING\r\n").await.unwrap();
        read_exactly(&mut client, 7).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.frames_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connection() {
        let (addr, stats, shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.send(true).unwrap();

        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
