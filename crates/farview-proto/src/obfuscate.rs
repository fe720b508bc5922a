//! Payload obfuscation.
//!
//! A symmetric, length-preserving XOR keystream. This is deliberately *not*
//! confidentiality-grade encryption — it is a light transport obfuscation
//! hook whose only hard requirements are that applying it twice is the
//! identity and that output length equals input length (the header's
//! `length` field must describe both the on-wire and the clear payload).
//!
//! The keystream mixes a fixed protocol key with the header sequence
//! number through a xorshift32 generator, so identical payloads at
//! different sequence positions produce different wire bytes.

/// Fixed 16-byte protocol key mixed into the keystream.
const STREAM_KEY: [u8; 16] = [
    0x5A, 0x3C, 0xE1, 0x0F, 0x97, 0x4B, 0x2D, 0xC8, 0x16, 0xAD, 0x60, 0xF3, 0x39, 0x7E, 0xB4, 0x82,
];

/// Seed constant for the xorshift state (splitmix-style odd multiplier).
const SEED_MIX: u32 = 0x9E37_79B9;

#[inline]
fn xorshift32(mut state: u32) -> u32 {
    state ^= state << 13;
    state ^= state >> 17;
    state ^= state << 5;
    state
}

/// Apply the keystream to `data` in place.
///
/// Symmetric: calling this twice with the same `sequence` restores the
/// original bytes.
pub fn apply_keystream(data: &mut [u8], sequence: u32) {
    let mut state = SEED_MIX ^ sequence.wrapping_mul(0x85EB_CA6B);
    // Avoid the degenerate all-zero xorshift orbit.
    if state == 0 {
        state = SEED_MIX;
    }

    let mut word = 0u32;
    for (i, byte) in data.iter_mut().enumerate() {
        if i % 4 == 0 {
            state = xorshift32(state);
            word = state;
        }
        let stream_byte = (word >> ((i % 4) * 8)) as u8;
        *byte ^= stream_byte ^ STREAM_KEY[i % STREAM_KEY.len()];
    }
}
