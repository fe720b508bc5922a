//! Viewer input payloads.

use bytes::Bytes;

use crate::{errors::Result, payloads::Reader};

/// Absolute mouse state from the viewer.
///
/// `buttons` is a state bitmap, not an edge event: a set bit means the
/// button is held, a clear bit means released. The injector derives
/// press/release edges by comparing against its previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    /// Cursor X in screen coordinates.
    pub x: i32,
    /// Cursor Y in screen coordinates.
    pub y: i32,
    /// Button state bitmap (see the `BUTTON_*` constants).
    pub buttons: u8,
    /// Wheel rotation delta; non-zero triggers a wheel event.
    pub wheel_delta: i32,
}

impl MouseEvent {
    /// Serialized size in bytes.
    pub const SIZE: usize = 13;

    /// Left button bit.
    pub const BUTTON_LEFT: u8 = 0x01;
    /// Right button bit.
    pub const BUTTON_RIGHT: u8 = 0x02;
    /// Middle button bit.
    pub const BUTTON_MIDDLE: u8 = 0x04;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.push(self.buttons);
        out.extend_from_slice(&self.wheel_delta.to_le_bytes());
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self { x: r.i32_le()?, y: r.i32_le()?, buttons: r.u8()?, wheel_delta: r.i32_le()? })
    }

    /// Left button held.
    #[must_use]
    pub fn left(&self) -> bool {
        self.buttons & Self::BUTTON_LEFT != 0
    }

    /// Right button held.
    #[must_use]
    pub fn right(&self) -> bool {
        self.buttons & Self::BUTTON_RIGHT != 0
    }

    /// Middle button held.
    #[must_use]
    pub fn middle(&self) -> bool {
        self.buttons & Self::BUTTON_MIDDLE != 0
    }
}

/// Keyboard state change from the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardEvent {
    /// Platform-neutral key code.
    pub key: u32,
    /// Modifier bitmap.
    pub modifiers: u32,
    /// `true` for press, `false` for release.
    pub pressed: bool,
}

impl KeyboardEvent {
    /// Serialized size in bytes.
    pub const SIZE: usize = 9;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.key.to_le_bytes());
        out.extend_from_slice(&self.modifiers.to_le_bytes());
        out.push(u8::from(self.pressed));
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self { key: r.u32_le()?, modifiers: r.u32_le()?, pressed: r.u8()? != 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_event_round_trip() {
        let event = MouseEvent {
            x: 640,
            y: -3,
            buttons: MouseEvent::BUTTON_LEFT | MouseEvent::BUTTON_MIDDLE,
            wheel_delta: -120,
        };
        let bytes = event.encode();
        assert_eq!(bytes.len(), MouseEvent::SIZE);
        let decoded = MouseEvent::decode(&bytes).unwrap();
        assert_eq!(decoded, event);
        assert!(decoded.left());
        assert!(!decoded.right());
        assert!(decoded.middle());
    }

    #[test]
    fn keyboard_event_round_trip() {
        let event = KeyboardEvent { key: 0x41, modifiers: 0x02, pressed: true };
        let bytes = event.encode();
        assert_eq!(bytes.len(), KeyboardEvent::SIZE);
        assert_eq!(KeyboardEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(MouseEvent::decode(&[0u8; 12]).is_err());
        assert!(KeyboardEvent::decode(&[0u8; 8]).is_err());
    }
}
