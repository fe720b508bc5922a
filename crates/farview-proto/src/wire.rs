//! Message assembly and streaming parse.
//!
//! Outbound: [`encode_message`] builds `header + obfuscated payload`.
//! Inbound: [`try_parse`] inspects the front of a receive buffer and either
//! yields a complete message (with the number of bytes consumed), reports
//! that more bytes are needed, or fails — in which case the caller resyncs
//! by dropping a single byte and retrying.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

use crate::{
    MessageType,
    errors::{ProtocolError, Result},
    header::MessageHeader,
    obfuscate::apply_keystream,
};

/// A fully framed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// The parsed header (copied out of the buffer).
    pub header: MessageHeader,
    /// De-obfuscated payload bytes.
    pub payload: Bytes,
    /// Total bytes consumed from the buffer (header + payload).
    pub consumed: usize,
}

/// Monotonic per-direction sequence allocator.
///
/// Sequences are written into outbound headers and treated as reserved on
/// receive; wrap-around is fine.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU32,
}

impl SequenceCounter {
    /// New counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence number.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Build a complete wire message: header followed by the obfuscated payload.
///
/// # Errors
///
/// [`ProtocolError::PayloadTooLarge`] when `payload` exceeds
/// [`MessageHeader::MAX_PAYLOAD_SIZE`].
pub fn encode_message(msg_type: MessageType, sequence: u32, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MessageHeader::MAX_PAYLOAD_SIZE as usize {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MessageHeader::MAX_PAYLOAD_SIZE as usize,
        });
    }

    let mut header = MessageHeader::new(msg_type);
    header.set_length(payload.len() as u32);
    header.set_sequence(sequence);

    let mut out = Vec::with_capacity(MessageHeader::SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    apply_keystream(&mut out[MessageHeader::SIZE..], sequence);
    Ok(out)
}

/// Attempt to parse one message from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete message
/// (either fewer than [`MessageHeader::SIZE`] bytes, or fewer than
/// `header + length` bytes). The obfuscation transform preserves length, so
/// the header's `length` field describes exactly how many wire bytes follow
/// the header.
///
/// # Errors
///
/// Propagates header validation failures ([`ProtocolError::InvalidMagic`],
/// [`ProtocolError::PayloadTooLarge`]); on error nothing is consumed and
/// the caller should drop one byte to resynchronize.
pub fn try_parse(buf: &[u8]) -> Result<Option<ParsedMessage>> {
    if buf.len() < MessageHeader::SIZE {
        return Ok(None);
    }

    let header = *MessageHeader::from_bytes(buf)?;
    let total = MessageHeader::SIZE + header.length() as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let mut payload = buf[MessageHeader::SIZE..total].to_vec();
    apply_keystream(&mut payload, header.sequence());

    Ok(Some(ParsedMessage { header, payload: Bytes::from(payload), consumed: total }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_round_trip() {
        let payload = b"frame-bytes".to_vec();
        let wire = encode_message(MessageType::ScreenData, 5, &payload).unwrap();
        assert_eq!(wire.len(), MessageHeader::SIZE + payload.len());

        // Payload is obfuscated on the wire.
        assert_ne!(&wire[MessageHeader::SIZE..], payload.as_slice());

        let parsed = try_parse(&wire).unwrap().unwrap();
        assert_eq!(parsed.header.message_type(), Some(MessageType::ScreenData));
        assert_eq!(parsed.header.sequence(), 5);
        assert_eq!(parsed.payload.as_ref(), payload.as_slice());
        assert_eq!(parsed.consumed, wire.len());
    }

    #[test]
    fn partial_header_needs_more() {
        let wire = encode_message(MessageType::Heartbeat, 0, &[]).unwrap();
        assert_eq!(try_parse(&wire[..8]).unwrap(), None);
    }

    #[test]
    fn partial_payload_needs_more() {
        let wire = encode_message(MessageType::ScreenData, 1, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(try_parse(&wire[..wire.len() - 1]).unwrap(), None);
    }

    #[test]
    fn garbage_prefix_is_an_error() {
        let mut wire = encode_message(MessageType::Heartbeat, 2, &[]).unwrap();
        wire.insert(0, 0xEE);
        assert!(try_parse(&wire).is_err());
    }

    #[test]
    fn resync_by_dropping_bytes_recovers() {
        let mut stream = vec![0xAAu8, 0xBB, 0xCC];
        let wire = encode_message(MessageType::Heartbeat, 3, &[]).unwrap();
        stream.extend_from_slice(&wire);

        // Emulate the client handler's resync loop.
        let mut dropped = 0;
        let parsed = loop {
            match try_parse(&stream) {
                Ok(Some(msg)) => break msg,
                Ok(None) | Err(_) => {
                    stream.remove(0);
                    dropped += 1;
                    assert!(dropped <= 10, "resync should succeed within the failure budget");
                },
            }
        };
        assert_eq!(parsed.header.message_type(), Some(MessageType::Heartbeat));
        assert_eq!(dropped, 3);
    }

    #[test]
    fn sequence_counter_is_monotonic() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn oversized_payload_rejected() {
        let huge = vec![0u8; MessageHeader::MAX_PAYLOAD_SIZE as usize + 1];
        assert!(matches!(
            encode_message(MessageType::ScreenData, 0, &huge),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
