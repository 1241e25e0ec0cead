//! Packed 4-bit grayscale frame.
//!
//! Layout:
//! ```text
//! +----------------------------------+-----------------------------------+
//! | "#file#000801314144imagebin"     | packed pixels, row-major          |
//! |  (26 bytes ASCII)                | byte = (odd << 4) | even          |
//! +----------------------------------+-----------------------------------+
//! ```
//!
//! Each pixel keeps the top four bits of its 8-bit luma. An odd pixel count
//! leaves the high nibble of the last byte at zero.

use crate::error::{Error, Result};
use image::{
    DynamicImage, GenericImageView, GrayImage, ImageError, Luma,
    error::{ParameterError, ParameterErrorKind},
    imageops::FilterType,
};
use log::debug;
use std::path::Path;

/// Header preceding every frame.
pub const FRAME_HEADER: &[u8] = b"#file#000801314144imagebin";

/// Native panel width in pixels.
pub const DEFAULT_WIDTH: u32 = 1872;

/// Native panel height in pixels.
pub const DEFAULT_HEIGHT: u32 = 1404;

/// Encoded image ready to be pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl ImageFrame {
    /// Build a frame from 8-bit luma values, one per pixel, row-major.
    pub fn from_luma(width: u32, height: u32, luma: &[u8]) -> Self {
        Self {
            width,
            height,
            packed: pack_nibbles(luma),
        }
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fixed header bytes.
    pub fn header(&self) -> &'static [u8] {
        FRAME_HEADER
    }

    /// Packed pixel bytes without the header.
    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    /// Total wire length, header included.
    pub fn len(&self) -> usize {
        FRAME_HEADER.len() + self.packed.len()
    }

    /// Whether the frame carries no pixels.
    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    /// Header followed by the packed pixels.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(FRAME_HEADER);
        out.extend_from_slice(&self.packed);
        out
    }
}

/// Pack 8-bit luma into 4-bit pairs.
///
/// Pixel `2k` lands in the low nibble of byte `k`, pixel `2k + 1` in the high
/// nibble.
pub fn pack_nibbles(luma: &[u8]) -> Vec<u8> {
    luma.chunks(2)
        .map(|pair| {
            let low = pair[0] >> 4;
            let high = pair.get(1).map_or(0, |p| p >> 4);
            (high << 4) | low
        })
        .collect()
}

/// Expand packed nibbles back to one byte per pixel, scaled to 8 bits.
///
/// `pixels` trims the padding nibble of an odd-length frame.
pub fn unpack_nibbles(packed: &[u8], pixels: usize) -> Vec<u8> {
    packed
        .iter()
        .flat_map(|b| [(b & 0x0F) << 4, b & 0xF0])
        .take(pixels)
        .collect()
}

/// Converts source images into [`ImageFrame`]s of a fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageEncoder {
    width: u32,
    height: u32,
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl ImageEncoder {
    /// Encoder producing `width` x `height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Target width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Target height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Load and encode an image file.
    pub fn encode_file<P: AsRef<Path>>(&self, path: P) -> Result<ImageFrame> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::SourceNotFound(path.to_path_buf()));
        }
        let image = image::open(path)?;
        let frame = self.encode(&image)?;
        debug!("Converted image '{}'", path.display());
        Ok(frame)
    }

    /// Decode an in-memory image and encode it.
    pub fn encode_bytes(&self, data: &[u8]) -> Result<ImageFrame> {
        let image = image::load_from_memory(data)?;
        self.encode(&image)
    }

    /// Encode a decoded image.
    ///
    /// Portrait sources are turned 90° clockwise first. The result is scaled
    /// to cover the target and center-cropped to it exactly.
    pub fn encode(&self, image: &DynamicImage) -> Result<ImageFrame> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "invalid frame size {}x{}",
                self.width, self.height
            )));
        }

        let (src_w, src_h) = image.dimensions();
        if src_w == 0 || src_h == 0 {
            return Err(Error::Image(ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            ))));
        }

        let rotated;
        let upright = if src_h > src_w {
            debug!("Rotating portrait image {src_w}x{src_h}");
            rotated = image.rotate90();
            &rotated
        } else {
            image
        };

        let fitted = upright.resize_to_fill(self.width, self.height, FilterType::Lanczos3);
        let gray = to_luma(&fitted);
        debug!(
            "Encoded {}x{} frame from {src_w}x{src_h} source",
            gray.width(),
            gray.height()
        );

        Ok(ImageFrame::from_luma(
            gray.width(),
            gray.height(),
            gray.as_raw(),
        ))
    }
}

/// Grayscale with ITU-R BT.601 weights.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_luma(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let level = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
        Luma([level.clamp(0.0, 255.0) as u8])
    })
}
