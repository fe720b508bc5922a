//! Frame encoding: pixel-layout conversion and JPEG compression.

use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

use crate::frame::{EncodedFrame, PixelBuffer, PixelFormat, RawFrame};

/// JPEG quality used when no override is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Errors produced while encoding a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The pixel buffer does not match its declared dimensions.
    #[error("pixel buffer does not match its dimensions")]
    MalformedBuffer,

    /// The JPEG encoder rejected the image.
    #[error("jpeg encoding failed: {0}")]
    Jpeg(String),
}

/// Convert a pixel buffer to packed 24-bit RGB, the codec-friendly layout.
pub fn to_rgb24(image: &PixelBuffer) -> Result<Vec<u8>, EncodeError> {
    let pixels = image.width as usize * image.height as usize;
    let bpp = image.format.bytes_per_pixel();
    if image.data.len() != pixels * bpp || pixels == 0 {
        return Err(EncodeError::MalformedBuffer);
    }

    match image.format {
        PixelFormat::Rgb8 => Ok(image.data.clone()),
        PixelFormat::Rgba8 => {
            let mut out = Vec::with_capacity(pixels * 3);
            for px in image.data.chunks_exact(4) {
                out.extend_from_slice(&px[..3]);
            }
            Ok(out)
        },
        PixelFormat::Bgra8 => {
            let mut out = Vec::with_capacity(pixels * 3);
            for px in image.data.chunks_exact(4) {
                out.push(px[2]);
                out.push(px[1]);
                out.push(px[0]);
            }
            Ok(out)
        },
    }
}

/// Encode a pixel buffer as JPEG at the given quality.
pub fn encode_jpeg(image: &PixelBuffer, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let rgb = to_rgb24(image)?;
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(&rgb, image.width, image.height, image::ColorType::Rgb8)
        .map_err(|e| EncodeError::Jpeg(e.to_string()))?;
    if out.is_empty() {
        return Err(EncodeError::Jpeg("encoder produced no output".to_string()));
    }
    Ok(out)
}

/// Encode a raw frame into its transport form.
pub fn encode_frame(frame: &RawFrame, quality: u8) -> Result<EncodedFrame, EncodeError> {
    let payload = encode_jpeg(&frame.image, quality)?;
    Ok(EncodedFrame::new(
        frame.frame_id,
        payload,
        (frame.image.width, frame.image.height),
        frame.image.byte_len() as u64,
    ))
}
