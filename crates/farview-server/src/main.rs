//! Farview server binary.
//!
//! # Usage
//!
//! ```bash
//! # No password, default port
//! farview-server
//!
//! # Custom port and password
//! farview-server --port 5901 --password secret
//! ```
//!
//! Exit codes: `0` normal, `1` configuration error, `2` bind failure,
//! `3` internal fatal error.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use farview_server::{ServerConfig, ServerManager, ServerManagerEvent};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Farview remote desktop server
#[derive(Parser, Debug)]
#[command(name = "farview-server")]
#[command(about = "Farview remote desktop server")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value = "5900")]
    port: u16,

    /// Viewer password (empty means no password required)
    #[arg(long, default_value = "")]
    password: String,

    /// Capture queue capacity
    #[arg(long, default_value = "120")]
    capture_queue_cap: usize,

    /// Processed queue capacity
    #[arg(long, default_value = "120")]
    processed_queue_cap: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            // Usage/parse problems are configuration errors (exit code 1).
            let _ = error.print();
            return ExitCode::from(1);
        },
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.capture_queue_cap == 0 || args.processed_queue_cap == 0 {
        tracing::error!("queue capacities must be at least 1");
        return ExitCode::from(1);
    }

    tracing::info!(port = args.port, "Farview server starting");
    if args.password.is_empty() {
        tracing::warn!("no password configured - any viewer will be accepted");
    }

    let config = ServerConfig {
        capture_queue_cap: args.capture_queue_cap,
        processed_queue_cap: args.processed_queue_cap,
        ..ServerConfig::default()
    };
    let mut manager = ServerManager::new(config);

    let password = (!args.password.is_empty()).then(|| args.password.clone());
    if let Err(error) = manager.start_server(args.port, password) {
        tracing::error!(%error, "failed to start server");
        return ExitCode::from(3);
    }

    // Event loop: react to manager events until the listener goes away.
    let mut started = false;
    loop {
        manager.poll(Duration::from_millis(100));
        while let Ok(event) = manager.events().try_recv() {
            match event {
                ServerManagerEvent::ServerStarted(port) => {
                    started = true;
                    tracing::info!(port, "server ready");
                },
                ServerManagerEvent::ServerError(message) => {
                    if started {
                        tracing::warn!(%message, "server error");
                    } else {
                        tracing::error!(%message, "bind failed");
                        return ExitCode::from(2);
                    }
                },
                ServerManagerEvent::ServerStopped => {
                    if started {
                        tracing::info!("server stopped");
                        return ExitCode::SUCCESS;
                    }
                },
                ServerManagerEvent::ClientAuthenticated(peer) => {
                    tracing::info!(%peer, "viewer session started");
                },
                ServerManagerEvent::ClientDisconnected(peer) => {
                    tracing::info!(%peer, "viewer session ended");
                },
            }
        }
    }
}
