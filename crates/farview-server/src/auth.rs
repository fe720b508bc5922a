//! Password authentication.
//!
//! Challenge/response over PBKDF2-SHA256: the server issues a random salt
//! plus derivation parameters, the client answers with the hex digest of
//! the derived key. A server with no password configured accepts any
//! request.

use farview_proto::payloads::AuthChallenge;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Salt length in bytes (32 hex chars on the wire).
pub const SALT_LEN: usize = 16;

/// PBKDF2 derivation parameters advertised in the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthParams {
    /// Iteration count.
    pub iterations: u32,
    /// Derived key length in bytes.
    pub key_length: u32,
}

impl Default for AuthParams {
    fn default() -> Self {
        Self { iterations: 10_000, key_length: 32 }
    }
}

/// Derive the PBKDF2-SHA256 digest a client is expected to present.
#[must_use]
pub fn derive_digest(password: &str, salt: &[u8], params: AuthParams) -> Vec<u8> {
    let mut key = vec![0u8; params.key_length as usize];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, &mut key);
    key
}

/// Session id derivation: SHA-256 over client identity, wall-clock millis
/// and fresh randomness, hex encoded (64 chars).
#[must_use]
pub fn session_id(client_id: &str) -> String {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let nonce: u64 = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(client_id.as_bytes());
    hasher.update(now_ms.to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Per-connection password verification state.
///
/// Owns the configured password (if any), the derivation parameters and
/// the salt handed out with the challenge.
pub struct PasswordGate {
    password: Option<String>,
    params: AuthParams,
    salt: Option<[u8; SALT_LEN]>,
}

impl PasswordGate {
    /// Create a gate. `None` (or an empty string) disables authentication.
    #[must_use]
    pub fn new(password: Option<String>) -> Self {
        let password = password.filter(|p| !p.is_empty());
        Self { password, params: AuthParams::default(), salt: None }
    }

    /// Override the derivation parameters.
    pub fn set_params(&mut self, params: AuthParams) {
        self.params = params;
    }

    /// `true` when a password is configured.
    #[must_use]
    pub fn requires_password(&self) -> bool {
        self.password.is_some()
    }

    /// Build the challenge for this connection, generating the salt on
    /// first use so retries see consistent parameters.
    pub fn challenge(&mut self) -> AuthChallenge {
        let salt = *self.salt.get_or_insert_with(|| {
            let mut salt = [0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            salt
        });
        AuthChallenge {
            method: AuthChallenge::METHOD_PBKDF2_SHA256,
            iterations: self.params.iterations,
            key_length: self.params.key_length,
            salt_hex: hex::encode(salt),
        }
    }

    /// Verify a client-presented hex digest against the configured
    /// password and issued salt.
    ///
    /// `false` when no challenge was issued yet, the hex is malformed, or
    /// the digest does not match. A gate without a password accepts
    /// everything.
    #[must_use]
    pub fn verify(&self, presented_hex: &str) -> bool {
        let Some(password) = &self.password else {
            return true;
        };
        let Some(salt) = &self.salt else {
            return false;
        };
        let Ok(presented) = hex::decode(presented_hex) else {
            return false;
        };
        let expected = derive_digest(password, salt, self.params);
        // Fixed-length comparison; digests are not secret-dependent in
        // length.
        presented == expected
    }
}
