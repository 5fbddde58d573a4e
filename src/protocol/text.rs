//! # ESC/POS Text Styling Commands
//!
//! This module implements text formatting commands for ESC/POS printers.
//!
//! ## Text Styling Overview
//!
//! | Style | Command | Effect |
//! |-------|---------|--------|
//! | Bold | ESC E n | **Emphasized** text |
//! | Underline | ESC - n | Underlined text |
//! | Invert | GS B n | White on black |
//! | Double Width / Height | GS ! n | 2x character size |
//! | Font | ESC M n | Font A (12×24) or B (9×24) |
//!
//! ## Layout Commands
//!
//! | Setting | Command | Range |
//! |---------|---------|-------|
//! | Alignment | ESC a n | 0 left, 1 center, 2 right |
//! | Line spacing | ESC 3 n | 0-255 dots |
//! | Character spacing | ESC SP n | 0-30 dots |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::commands::{ESC, GS, SP};
use crate::error::ThermolinkError;

/// Upper bound accepted by `ESC 3 n`.
pub const MAX_LINE_SPACING: i64 = 255;

/// Upper bound used for `ESC SP n`.
pub const MAX_CHAR_SPACING: i64 = 30;

// ============================================================================
// TEXT ALIGNMENT
// ============================================================================

/// Text alignment options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left = 0,
    Center = 1,
    Right = 2,
}

impl Alignment {
    /// Map a raw ESC/POS alignment index, clamping anything out of range to left.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => Self::Center,
            2 => Self::Right,
            _ => Self::Left,
        }
    }
}

impl FromStr for Alignment {
    type Err = ThermolinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Self::Left),
            "center" => Ok(Self::Center),
            "right" => Ok(Self::Right),
            other => Err(ThermolinkError::InvalidArgument(format!(
                "invalid alignment '{}'",
                other
            ))),
        }
    }
}

/// # Set Justification (ESC a n)
///
/// | Format  | Bytes |
/// |---------|-------|
/// | ASCII   | ESC a n |
/// | Hex     | 1B 61 n |
///
/// ## Example
///
/// ```
/// use thermolink::protocol::text::{align, Alignment};
///
/// assert_eq!(align(Alignment::Center), vec![0x1B, 0x61, 0x01]);
/// ```
pub fn align(alignment: Alignment) -> Vec<u8> {
    vec![ESC, b'a', alignment as u8]
}

// ============================================================================
// SPACING
// ============================================================================

/// Clamp a requested line spacing into the `ESC 3 n` range.
#[inline]
pub fn clamp_line_spacing(spacing: i64) -> u8 {
    spacing.clamp(0, MAX_LINE_SPACING) as u8
}

/// Clamp a requested character spacing into `[0, 30]`.
#[inline]
pub fn clamp_char_spacing(spacing: i64) -> u8 {
    spacing.clamp(0, MAX_CHAR_SPACING) as u8
}

/// # Set Line Spacing (ESC 3 n)
///
/// ```
/// use thermolink::protocol::text::line_spacing;
///
/// assert_eq!(line_spacing(300), vec![0x1B, 0x33, 255]);
/// assert_eq!(line_spacing(-5), vec![0x1B, 0x33, 0]);
/// ```
pub fn line_spacing(spacing: i64) -> Vec<u8> {
    vec![ESC, b'3', clamp_line_spacing(spacing)]
}

/// # Set Right-Side Character Spacing (ESC SP n)
pub fn char_spacing(spacing: i64) -> Vec<u8> {
    vec![ESC, SP, clamp_char_spacing(spacing)]
}

// ============================================================================
// FONT SELECTION
// ============================================================================

/// Available fonts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Font {
    /// Font A: 12×24 dots
    #[default]
    A = 0,
    /// Font B: 9×24 dots
    B = 1,
}

impl FromStr for Font {
    type Err = ThermolinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => Err(ThermolinkError::InvalidArgument(format!(
                "invalid font '{}'",
                other
            ))),
        }
    }
}

/// # Select Character Font (ESC M n)
pub fn font(f: Font) -> Vec<u8> {
    vec![ESC, b'M', f as u8]
}

// ============================================================================
// TRI-STATE STYLE FLAGS
// ============================================================================

/// A style flag that can be forced on, forced off, or left to the printer.
///
/// Deserializes from `true`, `false` or the string `"default"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Toggle {
    Enable,
    Disable,
    /// Emit nothing; the printer keeps whatever it had
    #[default]
    NoSetting,
}

impl Toggle {
    /// Whether the flag contributes an "on" bit.
    #[inline]
    pub fn is_enabled(self) -> bool {
        self == Self::Enable
    }
}

impl From<bool> for Toggle {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Enable } else { Self::Disable }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enable => write!(f, "true"),
            Self::Disable => write!(f, "false"),
            Self::NoSetting => write!(f, "default"),
        }
    }
}

impl Serialize for Toggle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Enable => serializer.serialize_bool(true),
            Self::Disable => serializer.serialize_bool(false),
            Self::NoSetting => serializer.serialize_str("default"),
        }
    }
}

impl<'de> Deserialize<'de> for Toggle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(flag) => Ok(flag.into()),
            Raw::Word(word) if word == "default" => Ok(Self::NoSetting),
            Raw::Word(word) => Err(serde::de::Error::custom(format!(
                "expected true, false or \"default\", got \"{}\"",
                word
            ))),
        }
    }
}

// ============================================================================
// EMPHASIS / UNDERLINE / INVERT
// ============================================================================

/// # Emphasized Mode (ESC E n)
#[inline]
pub fn bold(on: bool) -> Vec<u8> {
    vec![ESC, b'E', on as u8]
}

/// # Underline Mode (ESC - n)
///
/// `n = 1` draws a one-dot underline, `n = 0` turns it off.
#[inline]
pub fn underline(on: bool) -> Vec<u8> {
    vec![ESC, b'-', on as u8]
}

/// # White/Black Reverse (GS B n)
#[inline]
pub fn invert(on: bool) -> Vec<u8> {
    vec![GS, b'B', on as u8]
}

/// # Character Size (GS ! n)
///
/// Bits 4-6 select width magnification, bits 0-2 height magnification.
/// Only 1x and 2x are exposed.
///
/// ```
/// use thermolink::protocol::text::size;
///
/// assert_eq!(size(true, true), vec![0x1D, 0x21, 0x11]);
/// assert_eq!(size(false, true), vec![0x1D, 0x21, 0x01]);
/// ```
#[inline]
pub fn size(double_width: bool, double_height: bool) -> Vec<u8> {
    let mut n = 0u8;
    if double_width {
        n |= 0x10;
    }
    if double_height {
        n |= 0x01;
    }
    vec![GS, b'!', n]
}

// ============================================================================
// TESTS
// ============================================================================
