//! # ESC/POS Protocol Implementation
//!
//! This module provides low-level command builders for the ESC/POS dialect
//! spoken by generic Bluetooth thermal receipt printers, and the
//! [`CommandEncoder`] seam the session layer encodes through.
//!
//! ## Module Structure
//!
//! - [`commands`]: Fixed commands (init, cut, beep, drawer, self-test)
//! - [`text`]: Alignment, spacing, fonts, bold, underline, size
//! - [`barcode`]: 1D barcodes and QR codes
//! - [`graphics`]: Raster images
//! - [`charset`]: GBK / UTF-8 text encoding
//!
//! ## Usage Example
//!
//! ```
//! use thermolink::format::FormattingState;
//! use thermolink::protocol::{CommandEncoder, EscPosEncoder};
//!
//! let encoder = EscPosEncoder;
//! let setting = FormattingState::default();
//!
//! let mut data = Vec::new();
//! data.extend(encoder.header());
//! data.extend(encoder.text(&setting, "RECEIPT")?);
//! data.extend(encoder.cut(false));
//! # Ok::<(), thermolink::ThermolinkError>(())
//! ```

pub mod barcode;
pub mod charset;
pub mod commands;
pub mod graphics;
pub mod text;

use image::DynamicImage;

use crate::error::Result;
use crate::format::FormattingState;
use barcode::barcode1d::{self, BarcodeType};
use barcode::qr;
use charset::TextEncoding;
use text::Alignment;

/// Turns formatting settings plus a payload into printer bytes.
///
/// Content calls may fail for payloads the printer cannot represent;
/// layout and envelope calls cannot.
pub trait CommandEncoder: Send + Sync {
    /// Style prefix followed by the encoded text.
    fn text(&self, setting: &FormattingState, text: &str) -> Result<Vec<u8>>;

    /// Image scaled to the setting's width limit.
    fn bitmap(&self, setting: &FormattingState, image: &DynamicImage) -> Result<Vec<u8>>;

    /// Geometry commands followed by the symbol.
    fn barcode(&self, setting: &FormattingState, kind: BarcodeType, data: &str) -> Result<Vec<u8>>;

    fn qr(&self, setting: &FormattingState, data: &str, module_size: u8) -> Result<Vec<u8>>;

    fn align(&self, alignment: Alignment) -> Vec<u8>;
    fn line_spacing(&self, spacing: u8) -> Vec<u8>;
    fn char_spacing(&self, spacing: u8) -> Vec<u8>;

    fn self_test(&self) -> Vec<u8>;
    fn cut(&self, half: bool) -> Vec<u8>;
    fn beep(&self) -> Vec<u8>;
    fn open_drawer(&self) -> Vec<u8>;
    fn feed(&self, lines: u8) -> Vec<u8>;

    /// Envelope pieces
    fn header(&self) -> Vec<u8>;
    fn charset(&self, encoding: TextEncoding) -> Vec<u8>;
    fn terminator(&self) -> Vec<u8>;
    fn end(&self) -> Vec<u8>;
}

/// The ESC/POS encoder used against real printers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscPosEncoder;

impl CommandEncoder for EscPosEncoder {
    fn text(&self, setting: &FormattingState, content: &str) -> Result<Vec<u8>> {
        let payload = setting.encoding.encode(content)?;
        let style = &setting.text;

        let mut cmd = Vec::with_capacity(payload.len() + 15);
        let flags: [(text::Toggle, fn(bool) -> Vec<u8>); 3] = [
            (style.bold, text::bold),
            (style.underline, text::underline),
            (style.inverse, text::invert),
        ];
        for (toggle, command) in flags {
            if toggle != text::Toggle::NoSetting {
                cmd.extend(command(toggle.is_enabled()));
            }
        }
        if setting.has_size_setting() {
            cmd.extend(text::size(
                style.double_width.is_enabled(),
                style.double_height.is_enabled(),
            ));
        }
        cmd.extend(text::font(style.font));
        cmd.extend(payload);
        Ok(cmd)
    }

    fn bitmap(&self, setting: &FormattingState, image: &DynamicImage) -> Result<Vec<u8>> {
        Ok(graphics::bitmap(image, setting.bitmap.width_limit))
    }

    fn barcode(&self, setting: &FormattingState, kind: BarcodeType, data: &str) -> Result<Vec<u8>> {
        let symbol = barcode1d::print(kind, data.as_bytes())?;
        let style = &setting.barcode;

        let mut cmd = Vec::with_capacity(symbol.len() + 12);
        cmd.extend(barcode1d::set_hri_position(style.text_placement));
        cmd.extend(barcode1d::set_hri_font(style.font));
        cmd.extend(barcode1d::set_height(style.height as i64));
        cmd.extend(barcode1d::set_width(style.width as i64));
        cmd.extend(symbol);
        Ok(cmd)
    }

    fn qr(&self, _setting: &FormattingState, data: &str, module_size: u8) -> Result<Vec<u8>> {
        let stored = qr::store(data.as_bytes())?;

        let mut cmd = Vec::with_capacity(stored.len() + 33);
        cmd.extend(qr::set_model());
        cmd.extend(qr::set_cell_size(module_size));
        cmd.extend(qr::set_error_correction(qr::QrErrorLevel::M));
        cmd.extend(stored);
        cmd.extend(qr::print());
        Ok(cmd)
    }

    fn align(&self, alignment: Alignment) -> Vec<u8> {
        text::align(alignment)
    }

    fn line_spacing(&self, spacing: u8) -> Vec<u8> {
        text::line_spacing(spacing as i64)
    }

    fn char_spacing(&self, spacing: u8) -> Vec<u8> {
        text::char_spacing(spacing as i64)
    }

    fn self_test(&self) -> Vec<u8> {
        commands::self_test()
    }

    fn cut(&self, half: bool) -> Vec<u8> {
        commands::cut(half)
    }

    fn beep(&self) -> Vec<u8> {
        commands::beep()
    }

    fn open_drawer(&self) -> Vec<u8> {
        commands::open_drawer()
    }

    fn feed(&self, lines: u8) -> Vec<u8> {
        vec![commands::LF; lines as usize]
    }

    fn header(&self) -> Vec<u8> {
        commands::header()
    }

    fn charset(&self, encoding: TextEncoding) -> Vec<u8> {
        encoding.directive()
    }

    fn terminator(&self) -> Vec<u8> {
        commands::lf_cr()
    }

    fn end(&self) -> Vec<u8> {
        commands::end()
    }
}
