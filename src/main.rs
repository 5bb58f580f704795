//! shardkv server
//!
//! Entry point: parses configuration, sets up logging, binds the listener
//! and serves connections until SIGINT/SIGTERM.

use shardkv::server::Server;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Default log filter when RUST_LOG is not set
    log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: shardkv::DEFAULT_HOST.to_string(),
            port: shardkv::DEFAULT_PORT,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = require_value(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = require_value(&args, i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--log-level" | "-l" => {
                    config.log_level = require_value(&args, i, "--log-level").to_string();
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("shardkv version {}", shardkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn require_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
shardkv - Redis-compatible storage and protocol core

USAGE:
    shardkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>         Host to bind to (default: 0.0.0.0)
    -p, --port <PORT>         Port to listen on (default: 8888)
    -l, --log-level <FILTER>  Log filter when RUST_LOG is unset (default: info)
    -v, --version             Print version information
        --help                Print this help message

The server echoes every RESP frame it receives back in canonical form:
    $ redis-cli -p 8888 PING
    1) "PING"
"#
    );
}

/// Completes on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, stopping server...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(version = shardkv::VERSION, "Listening on {}", config.bind_address());

    Server::new(listener).run(shutdown_signal()).await;
    Ok(())
}
