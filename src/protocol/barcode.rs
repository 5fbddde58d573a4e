//! # ESC/POS Barcode Commands
//!
//! This module implements barcode generation commands for ESC/POS printers.
//!
//! ## Supported Barcode Types
//!
//! | Type | Command | Payload |
//! |------|---------|---------|
//! | UPC-A | GS k 65 | 11-12 digits |
//! | EAN-13 | GS k 67 | 12-13 digits |
//! | EAN-8 | GS k 68 | 7-8 digits |
//! | Code39 | GS k 69 | A-Z, 0-9, space, `-.$/+%*` |
//! | ITF | GS k 70 | even number of digits |
//! | Codabar | GS k 71 | A-D start/stop, `0-9-$:/.+` |
//! | Code128 | GS k 73 | ASCII |
//! | QR Code | GS ( k | up to 7089 bytes |
//!
//! ## 1D Barcode Usage
//!
//! ```
//! use thermolink::protocol::barcode::barcode1d::{self, BarcodeType};
//!
//! let mut data = Vec::new();
//! data.extend(barcode1d::set_height(72));
//! data.extend(barcode1d::print(BarcodeType::Code39, b"HELLO123")?);
//! # Ok::<(), thermolink::ThermolinkError>(())
//! ```
//!
//! ## QR Code Usage
//!
//! QR codes are generated in a multi-step process:
//!
//! 1. Configure QR settings (model, cell size, error correction)
//! 2. Store the data in the symbol buffer
//! 3. Print the symbol
//!
//! ```
//! use thermolink::protocol::barcode::qr;
//!
//! let mut data = Vec::new();
//! data.extend(qr::set_model());
//! data.extend(qr::set_cell_size(6));
//! data.extend(qr::set_error_correction(qr::QrErrorLevel::M));
//! data.extend(qr::store(b"https://example.com")?);
//! data.extend(qr::print());
//! # Ok::<(), thermolink::ThermolinkError>(())
//! ```

use super::commands::GS;

// ============================================================================
// 1D BARCODE COMMANDS (GS k)
// ============================================================================

/// 1D Barcode command builders
pub mod barcode1d {
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};

    use super::GS;
    use crate::error::{Result, ThermolinkError};
    use crate::protocol::text::Font;

    /// Smallest module width accepted by `GS w`.
    pub const MIN_MODULE_WIDTH: u8 = 2;
    /// Largest module width accepted by `GS w`.
    pub const MAX_MODULE_WIDTH: u8 = 6;

    /// 1D barcode symbologies (`GS k m` format 2 codes)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[repr(u8)]
    pub enum BarcodeType {
        #[serde(rename = "UPC_A")]
        UpcA = 65,
        #[serde(rename = "EAN13")]
        Ean13 = 67,
        #[serde(rename = "EAN8")]
        Ean8 = 68,
        #[serde(rename = "CODE39")]
        Code39 = 69,
        #[serde(rename = "ITF")]
        Itf = 70,
        #[serde(rename = "CODABAR")]
        Codabar = 71,
        #[serde(rename = "CODE128")]
        Code128 = 73,
    }

    impl FromStr for BarcodeType {
        type Err = ThermolinkError;

        fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
            match s {
                "UPC_A" => Ok(Self::UpcA),
                "EAN8" => Ok(Self::Ean8),
                "EAN13" => Ok(Self::Ean13),
                "CODE39" => Ok(Self::Code39),
                "ITF" => Ok(Self::Itf),
                "CODABAR" => Ok(Self::Codabar),
                "CODE128" => Ok(Self::Code128),
                // QR has its own call
                other => Err(ThermolinkError::InvalidArgument(format!(
                    "invalid barcode type '{}'",
                    other
                ))),
            }
        }
    }

    /// HRI (Human Readable Interpretation) position
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum HriPosition {
        /// No HRI text printed
        None = 0,
        /// HRI above barcode
        Above = 1,
        /// HRI below barcode (default)
        #[default]
        Below = 2,
        /// HRI both above and below
        Both = 3,
    }

    impl FromStr for HriPosition {
        type Err = ThermolinkError;

        fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
            match s {
                "none" => Ok(Self::None),
                "above" => Ok(Self::Above),
                "below" => Ok(Self::Below),
                "both" => Ok(Self::Both),
                other => Err(ThermolinkError::InvalidArgument(format!(
                    "invalid placement '{}'",
                    other
                ))),
            }
        }
    }

    /// # Set Module Width (GS w n)
    ///
    /// Clamped to the 2-6 range printers accept.
    pub fn set_width(n: i64) -> Vec<u8> {
        vec![GS, b'w', clamp_width(n)]
    }

    /// Clamp a requested module width.
    #[inline]
    pub fn clamp_width(n: i64) -> u8 {
        n.clamp(MIN_MODULE_WIDTH as i64, MAX_MODULE_WIDTH as i64) as u8
    }

    /// Clamp a requested bar height into 1-255 dots.
    #[inline]
    pub fn clamp_height(n: i64) -> u8 {
        n.clamp(1, 255) as u8
    }

    /// # Set Bar Height (GS h n)
    pub fn set_height(n: i64) -> Vec<u8> {
        vec![GS, b'h', clamp_height(n)]
    }

    /// # Select HRI Position (GS H n)
    pub fn set_hri_position(position: HriPosition) -> Vec<u8> {
        vec![GS, b'H', position as u8]
    }

    /// # Select HRI Font (GS f n)
    pub fn set_hri_font(font: Font) -> Vec<u8> {
        vec![GS, b'f', font as u8]
    }

    /// # Print Barcode (GS k m n d1...dn)
    ///
    /// Validates the payload against the symbology before emitting anything.
    /// Code128 payloads without an explicit code set get `{B` prepended.
    pub fn print(kind: BarcodeType, data: &[u8]) -> Result<Vec<u8>> {
        validate(kind, data)?;

        let mut payload = Vec::with_capacity(data.len() + 2);
        if kind == BarcodeType::Code128 && !data.starts_with(b"{") {
            payload.extend_from_slice(b"{B");
        }
        payload.extend_from_slice(data);

        if payload.len() > 255 {
            return Err(ThermolinkError::Encoding(format!(
                "barcode payload too long ({} bytes, max 255)",
                payload.len()
            )));
        }

        let mut cmd = Vec::with_capacity(payload.len() + 4);
        cmd.extend([GS, b'k', kind as u8, payload.len() as u8]);
        cmd.extend(payload);
        Ok(cmd)
    }

    /// Check that `data` is encodable as `kind`.
    pub fn validate(kind: BarcodeType, data: &[u8]) -> Result<()> {
        let invalid = |reason: &str| {
            Err(ThermolinkError::Encoding(format!(
                "{:?} barcode {}: {:?}",
                kind,
                reason,
                String::from_utf8_lossy(data)
            )))
        };

        if data.is_empty() {
            return invalid("requires data");
        }

        let all_digits = data.iter().all(u8::is_ascii_digit);
        match kind {
            BarcodeType::UpcA if !(all_digits && matches!(data.len(), 11 | 12)) => {
                invalid("needs 11 or 12 digits")
            }
            BarcodeType::Ean13 if !(all_digits && matches!(data.len(), 12 | 13)) => {
                invalid("needs 12 or 13 digits")
            }
            BarcodeType::Ean8 if !(all_digits && matches!(data.len(), 7 | 8)) => {
                invalid("needs 7 or 8 digits")
            }
            BarcodeType::Itf if !(all_digits && data.len() % 2 == 0) => {
                invalid("needs an even number of digits")
            }
            BarcodeType::Code39
                if !data
                    .iter()
                    .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase() || b" -.$/+%*".contains(b)) =>
            {
                invalid("contains characters outside the Code39 set")
            }
            BarcodeType::Codabar if !is_codabar(data) => {
                invalid("needs A-D start/stop characters around 0-9-$:/.+")
            }
            BarcodeType::Code128 if !data.is_ascii() => invalid("must be ASCII"),
            _ => Ok(()),
        }
    }

    fn is_codabar(data: &[u8]) -> bool {
        let is_guard = |b: &u8| matches!(b.to_ascii_uppercase(), b'A'..=b'D');
        data.len() >= 2
            && data.first().is_some_and(is_guard)
            && data.last().is_some_and(is_guard)
            && data[1..data.len() - 1]
                .iter()
                .all(|b| b.is_ascii_digit() || b"-$:/.+".contains(b))
    }
}

// ============================================================================
// QR CODE COMMANDS (GS ( k)
// ============================================================================

/// QR code command builders (model 2)
pub mod qr {
    use super::GS;
    use crate::error::{Result, ThermolinkError};

    /// Symbol storage limit for model 2, byte mode.
    pub const MAX_DATA_LEN: usize = 7089;

    /// QR error correction levels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum QrErrorLevel {
        /// ~7% recovery
        L = 48,
        /// ~15% recovery
        #[default]
        M = 49,
        /// ~25% recovery
        Q = 50,
        /// ~30% recovery
        H = 51,
    }

    /// # Select Model 2 (GS ( k fn 165)
    pub fn set_model() -> Vec<u8> {
        vec![GS, b'(', b'k', 4, 0, 49, 65, 50, 0]
    }

    /// # Set Module Size (GS ( k fn 167)
    ///
    /// Clamped to 1-16 dots.
    pub fn set_cell_size(n: u8) -> Vec<u8> {
        vec![GS, b'(', b'k', 3, 0, 49, 67, n.clamp(1, 16)]
    }

    /// # Set Error Correction (GS ( k fn 169)
    pub fn set_error_correction(level: QrErrorLevel) -> Vec<u8> {
        vec![GS, b'(', b'k', 3, 0, 49, 69, level as u8]
    }

    /// # Store Symbol Data (GS ( k fn 180)
    pub fn store(data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(ThermolinkError::Encoding("QR code requires data".to_string()));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(ThermolinkError::Encoding(format!(
                "QR payload too long ({} bytes, max {})",
                data.len(),
                MAX_DATA_LEN
            )));
        }

        let len = data.len() + 3;
        let mut cmd = Vec::with_capacity(len + 5);
        cmd.extend([GS, b'(', b'k', (len & 0xFF) as u8, (len >> 8) as u8, 49, 80, 48]);
        cmd.extend_from_slice(data);
        Ok(cmd)
    }

    /// # Print Stored Symbol (GS ( k fn 181)
    pub fn print() -> Vec<u8> {
        vec![GS, b'(', b'k', 3, 0, 49, 81, 48]
    }
}

// ============================================================================
// TESTS
// ============================================================================
