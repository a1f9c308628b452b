//! Frame encoder: off-screen draw, JPEG compression, data-URL payload.
//!
//! The analysis service expects a single text message per frame holding a
//! `data:image/jpeg;base64,...` URL. Quality is fixed (60, i.e. 0.6) to
//! bound payload size over throughput-limited transports.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use tokio::time::Instant;

use crate::error::VigilError;
use crate::stream::capture::CaptureDevice;
use crate::stream::types::{Frame, Resolution};

/// Prefix the service splits off before base64-decoding.
pub const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Default JPEG quality (0..=100).
pub const DEFAULT_QUALITY: u8 = 60;

// ── FrameEncoder ─────────────────────────────────────────────────

/// Reusable off-screen surface plus JPEG settings.
pub struct FrameEncoder {
    quality: u8,
    surface: RgbImage,
    /// Compressed bytes of the most recent frame (reused allocation).
    scratch: Vec<u8>,
    frame_count: u64,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            surface: RgbImage::new(0, 0),
            scratch: Vec::new(),
            frame_count: 0,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Draw the device's current image at `native` resolution and encode
    /// it into a transmittable [`Frame`].
    pub fn capture(
        &mut self,
        device: &mut dyn CaptureDevice,
        native: Resolution,
    ) -> Result<Frame, VigilError> {
        if self.surface.dimensions() != (native.width, native.height) {
            self.surface = RgbImage::new(native.width, native.height);
        }
        device.draw(&mut self.surface)?;
        let captured_at = Instant::now();

        let payload = self.encode_surface()?;
        self.frame_count += 1;
        Ok(Frame {
            payload,
            captured_at,
        })
    }

    fn encode_surface(&mut self) -> Result<String, VigilError> {
        self.scratch.clear();
        {
            let mut jpeg = JpegEncoder::new_with_quality(&mut self.scratch, self.quality);
            jpeg.encode_image(&self.surface)
                .map_err(|e| VigilError::Encode(format!("jpeg encode failed: {e}")))?;
        }

        let mut payload =
            String::with_capacity(DATA_URL_PREFIX.len() + self.scratch.len() * 4 / 3 + 4);
        payload.push_str(DATA_URL_PREFIX);
        STANDARD.encode_string(&self.scratch, &mut payload);
        Ok(payload)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

/// Decode a data-URL payload back into an image.
///
/// Accepts bare base64 as well; everything up to the first comma is
/// treated as the media-type header.
pub fn decode_payload(payload: &str) -> Result<RgbImage, VigilError> {
    let b64 = payload
        .split_once(',')
        .map(|(_, data)| data)
        .unwrap_or(payload);
    let bytes = STANDARD
        .decode(b64.trim())
        .map_err(|e| VigilError::MalformedMessage(format!("bad base64: {e}")))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| VigilError::MalformedMessage(format!("bad image: {e}")))?;
    Ok(img.to_rgb8())
}

// ── Tests ────────────────────────────────────────────────────────
