//! # ESC/POS Raster Graphics
//!
//! Images are printed with the raster bit-image command `GS v 0`, which takes
//! an arbitrary-height block of 1-bit rows.
//!
//! ## Coordinate System
//!
//! ```text
//! (0,0) ──────────────────────► X (horizontal, 384 dots on 58mm paper)
//!   │
//!   │   ████████  ← Each dot is 0.125mm at 200 DPI
//!   │   ████████
//!   ▼
//!   Y (vertical, paper feed direction)
//! ```
//!
//! ## Bit Packing
//!
//! - Bit 7 (MSB) = leftmost dot
//! - 1 = black (print), 0 = white (no print)
//!
//! ```text
//! Byte value 0xF0 = 11110000 = ████░░░░
//! Byte value 0x0F = 00001111 = ░░░░████
//! ```
//!
//! ## Input
//!
//! Callers hand over images as base64, optionally wrapped in a data URL
//! (`data:image/png;base64,...`). Anything the `image` crate can decode is
//! accepted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, imageops::FilterType};
use serde::{Deserialize, Serialize};

use super::commands::{GS, u16_le};
use crate::error::{Result, ThermolinkError};

/// Rows emitted per `GS v 0` command.
///
/// Cheap Bluetooth printers have small receive buffers; long images are
/// split into bands of this height.
pub const RASTER_BAND_ROWS: u32 = 256;

/// Luminance at or above which a pixel is left white.
pub const LUMA_THRESHOLD: u32 = 128;

// ============================================================================
// RESOLUTION
// ============================================================================

/// Print head resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dpi {
    /// 8 dots per mm
    #[default]
    #[serde(rename = "200")]
    Dpi200,
    /// 12 dots per mm
    #[serde(rename = "300")]
    Dpi300,
}

impl Dpi {
    /// Map a numeric DPI. Only 300 is special; everything else is 200.
    pub fn from_value(dpi: i64) -> Self {
        if dpi == 300 { Self::Dpi300 } else { Self::Dpi200 }
    }
}

// ============================================================================
// RASTER BIT IMAGE (GS v 0)
// ============================================================================

/// # Print Raster Bit Image (GS v 0 m xL xH yL yH d1...dk)
///
/// | Format  | Bytes |
/// |---------|-------|
/// | ASCII   | GS v 0 m xL xH yL yH d1...dk |
/// | Hex     | 1D 76 30 m xL xH yL yH d1...dk |
///
/// - `m`: 0 = normal density
/// - `xL xH`: width in **bytes**
/// - `yL yH`: height in dots
///
/// ```
/// use thermolink::protocol::graphics::raster;
///
/// let cmd = raster(16, 2, &[0xFF, 0x00, 0x0F, 0xF0]);
/// assert_eq!(&cmd[..8], &[0x1D, 0x76, 0x30, 0, 2, 0, 2, 0]);
/// ```
pub fn raster(width_dots: u16, height: u16, data: &[u8]) -> Vec<u8> {
    let width_bytes = width_dots.div_ceil(8);
    debug_assert_eq!(
        data.len(),
        width_bytes as usize * height as usize,
        "raster data length mismatch"
    );

    let [xl, xh] = u16_le(width_bytes);
    let [yl, yh] = u16_le(height);

    let mut cmd = Vec::with_capacity(8 + data.len());
    cmd.extend([GS, b'v', b'0', 0, xl, xh, yl, yh]);
    cmd.extend_from_slice(data);
    cmd
}

// ============================================================================
// IMAGE DECODING
// ============================================================================

/// Decode a base64 (or base64 data URL) image.
///
/// Every failure is reported as `InvalidArgument("invalid image")`; the
/// underlying cause is only logged.
pub fn decode_image(payload: &str) -> Result<DynamicImage> {
    let encoded = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };

    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
        tracing::debug!(error = %e, "image payload is not base64");
        invalid_image()
    })?;

    image::load_from_memory(&bytes).map_err(|e| {
        tracing::debug!(error = %e, "image payload could not be decoded");
        invalid_image()
    })
}

fn invalid_image() -> ThermolinkError {
    ThermolinkError::InvalidArgument("invalid image".to_string())
}

// ============================================================================
// IMAGE → RASTER
// ============================================================================

/// Pack an image into 1-bit rows no wider than `max_width` dots.
///
/// Wider images are scaled down preserving aspect ratio; narrower ones are
/// left alone. Transparent pixels print white. Returns `(width, height, rows)`.
pub fn pack_image(image: &DynamicImage, max_width: u32) -> (u32, u32, Vec<u8>) {
    let scaled;
    let source = if image.width() > max_width {
        let height = (image.height() as u64 * max_width as u64 / image.width().max(1) as u64)
            .max(1) as u32;
        scaled = image.resize_exact(max_width, height, FilterType::Triangle);
        &scaled
    } else {
        image
    };

    let rgba = source.to_rgba8();
    let (width, height) = rgba.dimensions();
    let width_bytes = width.div_ceil(8) as usize;
    let mut rows = vec![0u8; width_bytes * height as usize];

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        if a < 128 {
            continue;
        }
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
        if luma < LUMA_THRESHOLD {
            rows[y as usize * width_bytes + x as usize / 8] |= 0x80 >> (x % 8);
        }
    }

    (width, height, rows)
}

/// Encode an image as one or more `GS v 0` bands.
///
/// A `max_width` of zero disables image output and yields no bytes.
pub fn bitmap(image: &DynamicImage, max_width: u32) -> Vec<u8> {
    if max_width == 0 || image.width() == 0 || image.height() == 0 {
        return Vec::new();
    }

    // GS v 0 carries the width in a u16 of bytes; keep dots within u16 too
    let max_width = max_width.min(u16::MAX as u32 - 7);
    let (width, height, rows) = pack_image(image, max_width);
    let width_bytes = width.div_ceil(8) as usize;

    let mut cmd = Vec::with_capacity(rows.len() + 8 * height.div_ceil(RASTER_BAND_ROWS) as usize);
    let mut top = 0;
    while top < height {
        let band = RASTER_BAND_ROWS.min(height - top);
        let start = top as usize * width_bytes;
        let end = start + band as usize * width_bytes;
        cmd.extend(raster(width as u16, band as u16, &rows[start..end]));
        top += band;
    }
    cmd
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn solid(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    fn png_base64(img: &DynamicImage) -> String {
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        STANDARD.encode(bytes.into_inner())
    }

    #[test]
    fn test_raster_header() {
        let data = vec![0xAA; 48 * 3];
        let cmd = raster(384, 3, &data);
        assert_eq!(&cmd[..8], &[0x1D, 0x76, 0x30, 0x00, 48, 0, 3, 0]);
        assert_eq!(cmd.len(), 8 + 48 * 3);
    }

    #[test]
    fn test_raster_width_rounds_up() {
        let cmd = raster(10, 1, &[0xFF, 0xC0]);
        assert_eq!(cmd[4], 2);
    }

    #[test]
    fn test_dpi() {
        assert_eq!(Dpi::from_value(300), Dpi::Dpi300);
        assert_eq!(Dpi::from_value(203), Dpi::Dpi200);
        assert_eq!(Dpi::from_value(0), Dpi::Dpi200);
    }

    #[test]
    fn test_black_and_white_packing() {
        let (w, h, rows) = pack_image(&solid(8, 2, [0, 0, 0, 255]), 384);
        assert_eq!((w, h), (8, 2));
        assert_eq!(rows, vec![0xFF, 0xFF]);

        let (_, _, rows) = pack_image(&solid(8, 1, [255, 255, 255, 255]), 384);
        assert_eq!(rows, vec![0x00]);
    }

    #[test]
    fn test_transparent_prints_white() {
        let (_, _, rows) = pack_image(&solid(8, 1, [0, 0, 0, 0]), 384);
        assert_eq!(rows, vec![0x00]);
    }

    #[test]
    fn test_scales_down_to_limit() {
        let (w, h, _) = pack_image(&solid(800, 400, [0, 0, 0, 255]), 384);
        assert_eq!((w, h), (384, 192));

        let (w, h, _) = pack_image(&solid(100, 50, [0, 0, 0, 255]), 384);
        assert_eq!((w, h), (100, 50));
    }

    #[test]
    fn test_image_bands() {
        let cmd = bitmap(&solid(8, 300, [0, 0, 0, 255]), 384);
        // 256-row band + 44-row band, one byte per row
        assert_eq!(cmd.len(), 8 + 256 + 8 + 44);
        assert_eq!(&cmd[..8], &[0x1D, 0x76, 0x30, 0, 1, 0, 0, 1]);
        assert_eq!(&cmd[264..272], &[0x1D, 0x76, 0x30, 0, 1, 0, 44, 0]);
    }

    #[test]
    fn test_zero_limit_emits_nothing() {
        assert!(bitmap(&solid(8, 8, [0, 0, 0, 255]), 0).is_empty());
    }

    #[test]
    fn test_decode_plain_and_data_url() {
        let encoded = png_base64(&solid(4, 4, [0, 0, 0, 255]));
        assert_eq!(decode_image(&encoded).unwrap().width(), 4);

        let url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_image(&url).unwrap().height(), 4);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_image("not an image").unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: invalid image");

        let err = decode_image(&STANDARD.encode(b"plain text")).unwrap_err();
        assert!(matches!(err, ThermolinkError::InvalidArgument(_)));
    }
}
