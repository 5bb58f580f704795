//! TCP Server
//!
//! Accepts connections and runs each one in its own task until a shutdown
//! future completes. On shutdown the listener is closed, every connection is
//! told to finish, and the server waits up to [`CLOSE_TIMEOUT`] before
//! aborting the remaining connection tasks.

use crate::connection::{handle_connection, ConnectionStats};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long connections get to wind down after shutdown is requested.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    stats: Arc<ConnectionStats>,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connection statistics shared with every handler.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Serves connections until `shutdown` completes.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let (close_tx, close_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Closing server");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            Arc::clone(&self.stats),
                            close_rx.clone(),
                        ));
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }

        drop(self.listener);
        let _ = close_tx.send(true);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            warn!(
                remaining = connections.len(),
                "Connections did not close in time, aborting"
            );
            connections.shutdown().await;
        }

        info!("Server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::new(listener);
        let addr = server.local_addr().unwrap();
        let stats = server.stats();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b":7\r\n").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b":7\r\n");

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap();

        // The open connection was told to close
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
