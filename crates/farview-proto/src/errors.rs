//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding protocol messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short for the structure being parsed.
    #[error("message too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required by the structure.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Header magic did not match the protocol constant.
    #[error("invalid magic")]
    InvalidMagic,

    /// Header declares a payload larger than the protocol allows.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum accepted payload size.
        max: usize,
    },

    /// A fixed-width field held an invalid value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// Convenience alias used throughout the protocol crate.
pub type Result<T> = core::result::Result<T, ProtocolError>;
