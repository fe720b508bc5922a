//! Screen data payload.

use bytes::Bytes;

use crate::{
    errors::{ProtocolError, Result},
    payloads::Reader,
};

/// One encoded screen frame.
///
/// `x`/`y` give the frame origin on the remote display (always `0,0` for
/// whole-screen capture), `width`/`height` the decoded dimensions, and
/// `image_data` the JPEG bytes. The wire form carries an explicit
/// `data_size` so the payload is self-validating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenData {
    /// Frame origin X.
    pub x: i32,
    /// Frame origin Y.
    pub y: i32,
    /// Decoded frame width in pixels.
    pub width: u32,
    /// Decoded frame height in pixels.
    pub height: u32,
    /// JPEG-encoded image bytes.
    pub image_data: Bytes,
}

impl ScreenData {
    /// Fixed header portion preceding the image bytes.
    pub const FIXED_SIZE: usize = 20;

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE + self.image_data.len());
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&(self.image_data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.image_data);
        Bytes::from(out)
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidField`] when `data_size` disagrees with the
    /// actual number of trailing bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let x = r.i32_le()?;
        let y = r.i32_le()?;
        let width = r.u32_le()?;
        let height = r.u32_le()?;
        let data_size = r.u32_le()? as usize;
        if data_size != r.remaining() {
            return Err(ProtocolError::InvalidField("data_size"));
        }
        let image_data = Bytes::copy_from_slice(r.bytes(data_size)?);
        Ok(Self { x, y, width, height, image_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_data_round_trip() {
        let frame = ScreenData {
            x: 0,
            y: 0,
            width: 320,
            height: 240,
            image_data: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0x02]),
        };
        let bytes = frame.encode();
        assert_eq!(bytes.len(), ScreenData::FIXED_SIZE + 6);
        assert_eq!(ScreenData::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let frame = ScreenData {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
            image_data: Bytes::from_static(&[1, 2, 3, 4]),
        };
        let mut bytes = frame.encode().to_vec();
        // Claim a larger payload than is present.
        bytes[16] = 200;
        assert_eq!(ScreenData::decode(&bytes), Err(ProtocolError::InvalidField("data_size")));
    }

    #[test]
    fn decode_rejects_truncated_fixed_part() {
        assert!(ScreenData::decode(&[0u8; 10]).is_err());
    }
}
