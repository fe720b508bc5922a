//! Message header with zero-copy parsing.
//!
//! The [`MessageHeader`] is a fixed 16-byte structure serialized as raw
//! binary (little endian, network convention for this protocol). It carries
//! everything the framing layer needs: message type, payload length,
//! per-direction sequence number and flags. The obfuscation transform is
//! length-preserving, so `length` equals both the on-wire and the
//! de-obfuscated payload size.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MessageType,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte message header (little endian).
///
/// Fields are stored as raw byte arrays to avoid alignment issues with the
/// packed representation; accessors convert to native integers.
///
/// Layout:
///
/// ```text
/// offset size field
/// 0      2    magic     (0x5246)
/// 2      2    type      (MessageType as u16)
/// 4      4    length    (payload size after obfuscation)
/// 8      4    sequence  (monotonic per direction, reserved for future use)
/// 12     2    flags
/// 14     2    reserved  (zero)
/// ```
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MessageHeader {
    magic: [u8; 2],
    msg_type: [u8; 2],
    length: [u8; 4],
    sequence: [u8; 4],
    flags: [u8; 2],
    reserved: [u8; 2],
}

impl MessageHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 16;

    /// Protocol magic: "FR" in ASCII, read as a little-endian u16.
    pub const MAGIC: u16 = 0x5246;

    /// Maximum accepted payload size (16 MiB).
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Create a header for the given message type with zeroed
    /// length/sequence/flags.
    #[must_use]
    pub fn new(msg_type: MessageType) -> Self {
        Self::new_raw(msg_type.to_u16())
    }

    /// Create a header from a raw type value (used by tests exercising
    /// unknown-type handling).
    #[must_use]
    pub fn new_raw(msg_type: u16) -> Self {
        Self {
            magic: Self::MAGIC.to_le_bytes(),
            msg_type: msg_type.to_le_bytes(),
            length: [0; 4],
            sequence: [0; 4],
            flags: [0; 2],
            reserved: [0; 2],
        }
    }

    /// Parse a header from the front of `bytes` (zero-copy).
    ///
    /// Validates cheapest properties first: size, then magic, then the
    /// payload-size bound. The message *type* is intentionally not
    /// validated here — unknown types must still be framed correctly so the
    /// stream does not desynchronize.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TooShort`] if fewer than 16 bytes are available
    /// - [`ProtocolError::InvalidMagic`] if the magic does not match
    /// - [`ProtocolError::PayloadTooLarge`] if `length` exceeds the bound
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::TooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u16::from_le_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        let length = u32::from_le_bytes(header.length);
        if length > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: length as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize the header to its 16-byte wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol magic value.
    #[must_use]
    pub fn magic(&self) -> u16 {
        u16::from_le_bytes(self.magic)
    }

    /// Raw message type value.
    #[must_use]
    pub fn message_type_raw(&self) -> u16 {
        u16::from_le_bytes(self.msg_type)
    }

    /// Message type as enum. `None` if unrecognized.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.message_type_raw())
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn length(&self) -> u32 {
        u32::from_le_bytes(self.length)
    }

    /// Per-direction sequence number. Reserved: written monotonically,
    /// never validated on receive.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.sequence)
    }

    /// Header flags (currently unused, zero on the wire).
    #[must_use]
    pub fn flags(&self) -> u16 {
        u16::from_le_bytes(self.flags)
    }

    /// Set the payload length.
    pub fn set_length(&mut self, length: u32) {
        self.length = length.to_le_bytes();
    }

    /// Set the sequence number.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence.to_le_bytes();
    }

    /// Set the flags field.
    pub fn set_flags(&mut self, flags: u16) {
        self.flags = flags.to_le_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for MessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHeader")
            .field("magic", &format!("{:#06x}", self.magic()))
            .field("type", &self.message_type_raw())
            .field("length", &self.length())
            .field("sequence", &self.sequence())
            .field("flags", &self.flags())
            .finish()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for MessageHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for MessageHeader {}
