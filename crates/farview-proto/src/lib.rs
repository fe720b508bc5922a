//! Farview wire protocol.
//!
//! Defines the transport framing used between the server and the single
//! remote viewer: a fixed 16-byte little-endian header followed by a
//! length-preserving obfuscated payload. Payloads are fixed-width binary
//! structures (no self-describing serialization) so framing decisions need
//! only the header.
//!
//! # Layers
//!
//! - [`MessageHeader`]: zero-copy parsed 16-byte header
//! - [`obfuscate`]: symmetric XOR keystream applied to payload bytes
//! - [`payloads`]: per-message payload codecs
//! - [`wire`]: message assembly and the streaming parser used for inbound
//!   framing and resynchronization

#![forbid(unsafe_code)]

pub mod errors;
pub mod header;
pub mod obfuscate;
pub mod payloads;
pub mod wire;

pub use errors::{ProtocolError, Result};
pub use header::MessageHeader;
pub use wire::{ParsedMessage, SequenceCounter, encode_message, try_parse};

/// Protocol version advertised in handshake responses.
pub const PROTOCOL_VERSION: u32 = 1;

/// Message type discriminator carried in the header.
///
/// Values are stable wire constants. Unknown values are preserved by the
/// framing layer and surface as `None` from [`MessageType::from_u16`] so the
/// dispatcher can log and skip them without desynchronizing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client opens the session.
    HandshakeRequest,
    /// Server reply with version, geometry and identity strings.
    HandshakeResponse,
    /// Server-issued PBKDF2 challenge parameters.
    AuthChallenge,
    /// Client credential submission (possibly empty hash to request a
    /// challenge).
    AuthenticationRequest,
    /// Server authentication verdict and session id.
    AuthenticationResponse,
    /// Keep-alive, empty payload.
    Heartbeat,
    /// One encoded screen frame.
    ScreenData,
    /// Viewer mouse state.
    MouseEvent,
    /// Viewer keyboard state.
    KeyboardEvent,
}

impl MessageType {
    /// Wire value of this message type.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        match self {
            Self::HandshakeRequest => 1,
            Self::HandshakeResponse => 2,
            Self::AuthChallenge => 3,
            Self::AuthenticationRequest => 4,
            Self::AuthenticationResponse => 5,
            Self::Heartbeat => 6,
            Self::ScreenData => 16,
            Self::MouseEvent => 32,
            Self::KeyboardEvent => 33,
        }
    }

    /// Decode a wire value. `None` for unrecognized types.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::HandshakeRequest),
            2 => Some(Self::HandshakeResponse),
            3 => Some(Self::AuthChallenge),
            4 => Some(Self::AuthenticationRequest),
            5 => Some(Self::AuthenticationResponse),
            6 => Some(Self::Heartbeat),
            16 => Some(Self::ScreenData),
            32 => Some(Self::MouseEvent),
            33 => Some(Self::KeyboardEvent),
            _ => None,
        }
    }
}

/// Authentication verdict carried in [`payloads::AuthenticationResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// Credentials accepted; session established.
    Success,
    /// Credentials rejected.
    InvalidPassword,
}

impl AuthResult {
    /// Wire value of this verdict.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::InvalidPassword => 1,
        }
    }

    /// Decode a wire value. Unrecognized codes map to `InvalidPassword`
    /// (all non-zero codes are reserved failure variants).
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        if value == 0 { Self::Success } else { Self::InvalidPassword }
    }
}
