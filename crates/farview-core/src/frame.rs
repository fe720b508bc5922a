//! Pipeline data model: pixel buffers and the frames exchanged between
//! stages.
//!
//! Ownership of a frame transfers on enqueue; the producer never touches it
//! again. Frame ids are strictly increasing and `0` is reserved as the
//! invalid id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pixel layout of a captured buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel.
    Rgba8,
    /// 8-bit BGRA, 4 bytes per pixel (common on Windows/macOS grabs).
    Bgra8,
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb8,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgb8 => 3,
        }
    }
}

/// A captured image: dimensions, pixel format and row-major bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Row-major pixel bytes, no padding between rows.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Construct a buffer, validating that `data` matches the dimensions.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        (data.len() == expected && expected > 0)
            .then_some(Self { width, height, format, data })
    }

    /// `true` when the buffer holds no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Total pixel byte size.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Monotonic frame id allocator. `0` is reserved as invalid.
#[derive(Debug)]
pub struct FrameIdGen {
    next: AtomicU64,
}

impl FrameIdGen {
    /// New allocator; the first id handed out is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Allocate the next id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for FrameIdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// A captured, not-yet-encoded frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Strictly increasing id, `> 0`.
    pub frame_id: u64,
    /// The captured pixels.
    pub image: PixelBuffer,
    /// Monotonic capture instant.
    pub captured_at: Instant,
    /// Dimensions at capture time.
    pub original_size: (u32, u32),
}

impl RawFrame {
    /// Build a frame from a freshly captured buffer.
    #[must_use]
    pub fn new(frame_id: u64, image: PixelBuffer) -> Self {
        let original_size = (image.width, image.height);
        Self { frame_id, image, captured_at: Instant::now(), original_size }
    }

    /// Frame validity: positive id, non-empty image, non-zero size.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.frame_id > 0
            && !self.image.is_empty()
            && self.original_size.0 > 0
            && self.original_size.1 > 0
    }

    /// Age of the frame since capture.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// A transport-ready encoded frame.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Id of the raw frame this was encoded from.
    pub original_frame_id: u64,
    /// JPEG bytes.
    pub payload: Vec<u8>,
    /// Decoded dimensions.
    pub image_size: (u32, u32),
    /// Monotonic encode-completion instant.
    pub processed_at: Instant,
    /// Size of the raw pixel data before encoding.
    pub original_bytes: u64,
    /// Size of `payload`. Always equals `payload.len()`.
    pub encoded_bytes: u64,
}

impl EncodedFrame {
    /// Build an encoded frame; `encoded_bytes` is derived from the payload.
    #[must_use]
    pub fn new(
        original_frame_id: u64,
        payload: Vec<u8>,
        image_size: (u32, u32),
        original_bytes: u64,
    ) -> Self {
        let encoded_bytes = payload.len() as u64;
        Self {
            original_frame_id,
            payload,
            image_size,
            processed_at: Instant::now(),
            original_bytes,
            encoded_bytes,
        }
    }

    /// Frame validity: positive id, non-empty payload, non-zero size.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.original_frame_id > 0
            && !self.payload.is_empty()
            && self.image_size.0 > 0
            && self.image_size.1 > 0
            && self.encoded_bytes == self.payload.len() as u64
    }

    /// Time since encoding finished.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.processed_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(w: u32, h: u32) -> PixelBuffer {
        PixelBuffer::new(w, h, PixelFormat::Rgba8, vec![0; (w * h * 4) as usize]).unwrap()
    }

    #[test]
    fn pixel_buffer_validates_dimensions() {
        assert!(PixelBuffer::new(2, 2, PixelFormat::Rgba8, vec![0; 16]).is_some());
        assert!(PixelBuffer::new(2, 2, PixelFormat::Rgba8, vec![0; 15]).is_none());
        assert!(PixelBuffer::new(0, 0, PixelFormat::Rgb8, Vec::new()).is_none());
    }

    #[test]
    fn frame_ids_are_monotonic_and_nonzero() {
        let ids = FrameIdGen::new();
        let a = ids.next();
        let b = ids.next();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn raw_frame_validity() {
        let frame = RawFrame::new(1, buffer(4, 4));
        assert!(frame.is_valid());

        let invalid = RawFrame::new(0, buffer(4, 4));
        assert!(!invalid.is_valid());
    }

    #[test]
    fn encoded_frame_tracks_payload_len() {
        let frame = EncodedFrame::new(3, vec![1, 2, 3], (4, 4), 64);
        assert!(frame.is_valid());
        assert_eq!(frame.encoded_bytes, 3);

        let empty = EncodedFrame::new(3, Vec::new(), (4, 4), 64);
        assert!(!empty.is_valid());
    }
}
