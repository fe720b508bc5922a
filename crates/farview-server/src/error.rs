//! Server error types.

use farview_core::ThreadError;
use thiserror::Error;

/// Errors surfaced by the server orchestration layer.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid configuration; fix and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// The listening socket could not be bound.
    #[error("bind failed: {0}")]
    Bind(String),

    /// The server is already running (re-entry guard).
    #[error("server already running on port {0}")]
    AlreadyRunning(u16),

    /// A thread registry operation failed.
    #[error("thread error: {0}")]
    Thread(#[from] ThreadError),

    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
