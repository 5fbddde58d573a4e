//! # Formatting State
//!
//! The settings a session's content operations are encoded under: text
//! style, layout spacing, barcode geometry, bitmap scaling and the text
//! encoding. Owned by exactly one [`Session`](crate::session::Session) and
//! replaced wholesale when formatting is reset.
//!
//! ## Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | Alignment | left |
//! | Line spacing | 30 dots |
//! | Character spacing | 1 dot |
//! | Bold / underline / double size / inverse | off |
//! | Font | A |
//! | Barcode width / height | 3 / 72 dots |
//! | Barcode text | below, font A |
//! | Bitmap width limit | 384 dots (48 × 8) |
//! | Encoding | GBK |

use serde::Serialize;

use crate::protocol::barcode::barcode1d::{self, HriPosition};
use crate::protocol::charset::TextEncoding;
use crate::protocol::graphics::Dpi;
use crate::protocol::text::{self, Alignment, Font, Toggle};

/// Line spacing applied on reset.
pub const DEFAULT_LINE_SPACING: u8 = 30;

/// Character spacing applied on reset.
pub const DEFAULT_CHAR_SPACING: u8 = 1;

/// Bitmap width limit applied on reset, in width units.
pub const DEFAULT_BITMAP_WIDTH: u32 = 48;

/// Printer dots per width unit.
pub const DOTS_PER_WIDTH_UNIT: u32 = 8;

/// Per-character text styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    pub bold: Toggle,
    pub underline: Toggle,
    pub double_width: Toggle,
    pub double_height: Toggle,
    pub inverse: Toggle,
    pub font: Font,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            bold: Toggle::Disable,
            underline: Toggle::Disable,
            double_width: Toggle::Disable,
            double_height: Toggle::Disable,
            inverse: Toggle::Disable,
            font: Font::A,
        }
    }
}

/// 1D barcode geometry and human-readable text options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeStyle {
    /// Module width in dots, 2-6
    pub width: u8,
    /// Bar height in dots, 1-255
    pub height: u8,
    pub text_placement: HriPosition,
    pub font: Font,
}

impl Default for BarcodeStyle {
    fn default() -> Self {
        Self {
            width: 3,
            height: 72,
            text_placement: HriPosition::Below,
            font: Font::A,
        }
    }
}

/// Image scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BitmapStyle {
    pub dpi: Dpi,
    /// Maximum image width in printer dots; 0 disables images
    pub width_limit: u32,
}

impl Default for BitmapStyle {
    fn default() -> Self {
        Self {
            dpi: Dpi::Dpi200,
            width_limit: DEFAULT_BITMAP_WIDTH * DOTS_PER_WIDTH_UNIT,
        }
    }
}

/// Everything content operations are encoded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingState {
    pub alignment: Alignment,
    pub line_spacing: u8,
    pub char_spacing: u8,
    pub text: TextStyle,
    pub barcode: BarcodeStyle,
    pub bitmap: BitmapStyle,
    pub encoding: TextEncoding,
}

impl Default for FormattingState {
    fn default() -> Self {
        Self::with_encoding(TextEncoding::default())
    }
}

impl FormattingState {
    /// Baseline formatting carrying a specific text encoding.
    pub fn with_encoding(encoding: TextEncoding) -> Self {
        Self {
            alignment: Alignment::Left,
            line_spacing: DEFAULT_LINE_SPACING,
            char_spacing: DEFAULT_CHAR_SPACING,
            text: TextStyle::default(),
            barcode: BarcodeStyle::default(),
            bitmap: BitmapStyle::default(),
            encoding,
        }
    }

    /// Reset to the baseline. The encoding is a session choice and survives.
    pub fn reset(&mut self) {
        *self = Self::with_encoding(self.encoding);
    }

    /// Store a line spacing, clamped to 0-255.
    pub fn set_line_spacing(&mut self, spacing: i64) -> u8 {
        self.line_spacing = text::clamp_line_spacing(spacing);
        self.line_spacing
    }

    /// Store a character spacing, clamped to 0-30.
    pub fn set_char_spacing(&mut self, spacing: i64) -> u8 {
        self.char_spacing = text::clamp_char_spacing(spacing);
        self.char_spacing
    }

    pub fn set_barcode_width(&mut self, width: i64) {
        self.barcode.width = barcode1d::clamp_width(width);
    }

    pub fn set_barcode_height(&mut self, height: i64) {
        self.barcode.height = barcode1d::clamp_height(height);
    }

    /// Store the bitmap width limit given in width units.
    ///
    /// Always scaled ×8, whatever the DPI. Negative widths store 0, which
    /// turns image output off.
    pub fn set_bitmap_width(&mut self, width: i64) -> u32 {
        let units = u32::try_from(width.max(0)).unwrap_or(u32::MAX);
        self.bitmap.width_limit = units.saturating_mul(DOTS_PER_WIDTH_UNIT);
        self.bitmap.width_limit
    }

    /// Store the print head resolution. The width limit is left alone.
    pub fn set_dpi(&mut self, dpi: i64) {
        self.bitmap.dpi = Dpi::from_value(dpi);
    }

    /// Any toggle that touches `GS !`.
    pub(crate) fn has_size_setting(&self) -> bool {
        self.text.double_width != Toggle::NoSetting || self.text.double_height != Toggle::NoSetting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = FormattingState::default();
        assert_eq!(state.alignment, Alignment::Left);
        assert_eq!(state.line_spacing, 30);
        assert_eq!(state.char_spacing, 1);
        assert_eq!(state.text.bold, Toggle::Disable);
        assert_eq!(state.barcode.text_placement, HriPosition::Below);
        assert_eq!(state.bitmap.width_limit, 384);
        assert_eq!(state.encoding, TextEncoding::Gbk);
    }

    #[test]
    fn test_width_limit_scaling() {
        let mut state = FormattingState::default();
        assert_eq!(state.set_bitmap_width(48), 384);
        assert_eq!(state.set_bitmap_width(0), 0);
        assert_eq!(state.set_bitmap_width(-3), 0);

        state.set_dpi(300);
        assert_eq!(state.bitmap.dpi, Dpi::Dpi300);
        assert_eq!(state.bitmap.width_limit, 0);
        assert_eq!(state.set_bitmap_width(48), 384);

        state.set_dpi(250);
        assert_eq!(state.bitmap.dpi, Dpi::Dpi200);
    }

    #[test]
    fn test_spacing_clamps() {
        let mut state = FormattingState::default();
        assert_eq!(state.set_line_spacing(300), 255);
        assert_eq!(state.set_line_spacing(-5), 0);
        assert_eq!(state.set_char_spacing(64), 30);
    }

    #[test]
    fn test_reset_keeps_encoding() {
        let mut state = FormattingState::with_encoding(TextEncoding::Utf8);
        state.set_line_spacing(100);
        state.text.bold = Toggle::Enable;
        state.set_barcode_width(6);

        state.reset();
        assert_eq!(state, FormattingState::with_encoding(TextEncoding::Utf8));
    }

    #[test]
    fn test_barcode_clamps() {
        let mut state = FormattingState::default();
        state.set_barcode_width(10);
        state.set_barcode_height(0);
        assert_eq!(state.barcode.width, 6);
        assert_eq!(state.barcode.height, 1);
    }
}
