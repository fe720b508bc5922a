//! Handshake, authentication and heartbeat payloads.
//!
//! All strings travel in fixed-width NUL-terminated fields so every
//! session-layer message has a fixed wire size.

use bytes::Bytes;

use crate::{
    AuthResult,
    errors::Result,
    payloads::{Reader, parse_fixed_str, put_fixed_str},
};

/// Width of the server name field in [`HandshakeResponse`].
const SERVER_NAME_LEN: usize = 64;
/// Width of the server OS field in [`HandshakeResponse`].
const SERVER_OS_LEN: usize = 32;
/// Width of the username field in [`AuthenticationRequest`].
const USERNAME_LEN: usize = 64;
/// Width of the password hash field (64 hex chars + NUL).
const PASSWORD_HASH_LEN: usize = 65;
/// Width of the salt field (32 hex chars + NUL).
const SALT_HEX_LEN: usize = 33;
/// Width of the session id field (64 hex chars + NUL).
const SESSION_ID_LEN: usize = 65;

/// Client hello: protocol version and a capabilities bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Client protocol version.
    pub client_version: u32,
    /// Capability bits (reserved, zero today).
    pub capabilities: u32,
}

impl HandshakeRequest {
    /// Serialized size in bytes.
    pub const SIZE: usize = 8;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.client_version.to_le_bytes());
        out.extend_from_slice(&self.capabilities.to_le_bytes());
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self { client_version: r.u32_le()?, capabilities: r.u32_le()? })
    }
}

/// Server hello: version, screen geometry and identity strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Server protocol version.
    pub server_version: u32,
    /// Captured screen width in pixels.
    pub screen_width: u32,
    /// Captured screen height in pixels.
    pub screen_height: u32,
    /// Color depth in bits.
    pub color_depth: u32,
    /// Feature bits (reserved, zero today).
    pub features: u32,
    /// Human-readable server name.
    pub server_name: String,
    /// Server operating system string.
    pub server_os: String,
}

impl HandshakeResponse {
    /// Serialized size in bytes.
    pub const SIZE: usize = 20 + SERVER_NAME_LEN + SERVER_OS_LEN;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.server_version.to_le_bytes());
        out.extend_from_slice(&self.screen_width.to_le_bytes());
        out.extend_from_slice(&self.screen_height.to_le_bytes());
        out.extend_from_slice(&self.color_depth.to_le_bytes());
        out.extend_from_slice(&self.features.to_le_bytes());
        put_fixed_str(&mut out, &self.server_name, SERVER_NAME_LEN);
        put_fixed_str(&mut out, &self.server_os, SERVER_OS_LEN);
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            server_version: r.u32_le()?,
            screen_width: r.u32_le()?,
            screen_height: r.u32_le()?,
            color_depth: r.u32_le()?,
            features: r.u32_le()?,
            server_name: parse_fixed_str(r.bytes(SERVER_NAME_LEN)?),
            server_os: parse_fixed_str(r.bytes(SERVER_OS_LEN)?),
        })
    }
}

/// PBKDF2 challenge parameters issued by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Key-derivation method. `1` = PBKDF2-SHA256.
    pub method: u32,
    /// PBKDF2 iteration count.
    pub iterations: u32,
    /// Derived key length in bytes.
    pub key_length: u32,
    /// Hex-encoded 16-byte salt.
    pub salt_hex: String,
}

impl AuthChallenge {
    /// Serialized size in bytes.
    pub const SIZE: usize = 12 + SALT_HEX_LEN;

    /// The only method currently defined.
    pub const METHOD_PBKDF2_SHA256: u32 = 1;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.iterations.to_le_bytes());
        out.extend_from_slice(&self.key_length.to_le_bytes());
        put_fixed_str(&mut out, &self.salt_hex, SALT_HEX_LEN);
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            method: r.u32_le()?,
            iterations: r.u32_le()?,
            key_length: r.u32_le()?,
            salt_hex: parse_fixed_str(r.bytes(SALT_HEX_LEN)?),
        })
    }
}

/// Client credential submission.
///
/// An empty `password_hash` asks the server for challenge parameters; a
/// populated one is the hex PBKDF2 digest computed from those parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    /// Client-chosen username (informational).
    pub username: String,
    /// Hex PBKDF2 digest, or empty to request a challenge.
    pub password_hash: String,
    /// Requested method. `1` = PBKDF2-SHA256.
    pub auth_method: u32,
}

impl AuthenticationRequest {
    /// Serialized size in bytes.
    pub const SIZE: usize = USERNAME_LEN + PASSWORD_HASH_LEN + 4;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut out, &self.username, USERNAME_LEN);
        put_fixed_str(&mut out, &self.password_hash, PASSWORD_HASH_LEN);
        out.extend_from_slice(&self.auth_method.to_le_bytes());
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            username: parse_fixed_str(r.bytes(USERNAME_LEN)?),
            password_hash: parse_fixed_str(r.bytes(PASSWORD_HASH_LEN)?),
            auth_method: r.u32_le()?,
        })
    }
}

/// Server authentication verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// Verdict code.
    pub result: AuthResult,
    /// Session id (hex SHA-256), empty on failure.
    pub session_id: String,
    /// Permission bits (reserved, zero today).
    pub permissions: u32,
}

impl AuthenticationResponse {
    /// Serialized size in bytes.
    pub const SIZE: usize = 4 + SESSION_ID_LEN + 4;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.result.to_u32().to_le_bytes());
        put_fixed_str(&mut out, &self.session_id, SESSION_ID_LEN);
        out.extend_from_slice(&self.permissions.to_le_bytes());
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            result: AuthResult::from_u32(r.u32_le()?),
            session_id: parse_fixed_str(r.bytes(SESSION_ID_LEN)?),
            permissions: r.u32_le()?,
        })
    }
}
