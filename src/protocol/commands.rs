//! # ESC/POS Protocol Commands
//!
//! This module implements the fixed-form ESC/POS commands used by generic
//! thermal receipt printers (58mm / 80mm Bluetooth models).
//!
//! ## Escape Sequence Structure
//!
//! Commands follow these patterns:
//! - Single byte: `LF`, `CR`
//! - Two bytes: `ESC @`
//! - Multi-byte with parameters: `ESC p m t1 t2`, `GS ( A pL pH n m`
//!
//! ## Byte Order
//!
//! Multi-byte integers use **little-endian** encoding:
//! - `u16` value 0x1234 is sent as bytes `[0x34, 0x12]`

// ============================================================================
// ESCAPE SEQUENCE CONSTANTS
// ============================================================================

/// ESC (Escape) - Command prefix byte
pub const ESC: u8 = 0x1B;

/// GS (Group Separator) - Extended command prefix
///
/// Used for graphics, barcodes, cutter and size commands.
pub const GS: u8 = 0x1D;

/// FS (File Separator) - Double-byte (Kanji/GBK) mode prefix
pub const FS: u8 = 0x1C;

/// LF (Line Feed) - Print and advance one line
pub const LF: u8 = 0x0A;

/// CR (Carriage Return)
pub const CR: u8 = 0x0D;

/// SP (Space) - used as the command byte of `ESC SP n`
pub const SP: u8 = 0x20;

// ============================================================================
// INITIALIZATION
// ============================================================================

/// # Initialize Printer (ESC @)
///
/// Resets the printer to its power-on default state.
///
/// | Format  | Bytes |
/// |---------|-------|
/// | ASCII   | ESC @ |
/// | Hex     | 1B 40 |
///
/// ## Example
///
/// ```
/// use thermolink::protocol::commands;
///
/// assert_eq!(commands::init(), vec![0x1B, 0x40]);
/// ```
#[inline]
pub fn init() -> Vec<u8> {
    vec![ESC, b'@']
}

/// Envelope header sent before a flushed buffer.
#[inline]
pub fn header() -> Vec<u8> {
    init()
}

/// Envelope end marker.
///
/// The LF/CR terminators preceding it have already printed the last line,
/// so the reset only clears leftover mode state for the next job.
#[inline]
pub fn end() -> Vec<u8> {
    init()
}

/// Line feed followed by carriage return.
#[inline]
pub fn lf_cr() -> Vec<u8> {
    vec![LF, CR]
}

// ============================================================================
// CUTTER CONTROL
// ============================================================================

/// # Full Cut (GS V 0)
///
/// | Format  | Bytes    |
/// |---------|----------|
/// | ASCII   | GS V 0   |
/// | Hex     | 1D 56 00 |
#[inline]
pub fn cut_full() -> Vec<u8> {
    vec![GS, b'V', 0]
}

/// # Partial Cut (GS V 1)
///
/// Leaves a small hinge connecting the receipt to the roll. Models without
/// a partial cutter ignore it.
#[inline]
pub fn cut_partial() -> Vec<u8> {
    vec![GS, b'V', 1]
}

/// Full or partial cut depending on `half`.
#[inline]
pub fn cut(half: bool) -> Vec<u8> {
    if half { cut_partial() } else { cut_full() }
}

// ============================================================================
// PERIPHERALS
// ============================================================================

/// # Buzzer (ESC B n t)
///
/// Beeps `n` times with a duration of `t × 50ms`. Printers without a buzzer
/// ignore the command.
#[inline]
pub fn beep() -> Vec<u8> {
    vec![ESC, b'B', 3, 3]
}

/// # Cash Drawer Kick (ESC p m t1 t2)
///
/// Pulses drawer pin 2 on for 100ms (50 × 2ms) and off for 250ms (125 × 2ms).
#[inline]
pub fn open_drawer() -> Vec<u8> {
    vec![ESC, b'p', 0x00, 0x32, 0x7D]
}

/// # Self-Test Print (GS ( A pL pH n m)
///
/// Prints the printer's own configuration page.
#[inline]
pub fn self_test() -> Vec<u8> {
    vec![GS, b'(', b'A', 2, 0, 0, 2]
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Encode a u16 value as little-endian bytes [low, high]
///
/// ## Example
///
/// ```
/// use thermolink::protocol::commands::u16_le;
///
/// assert_eq!(u16_le(0x1234), [0x34, 0x12]);
/// assert_eq!(u16_le(384), [0x80, 0x01]);
/// ```
#[inline]
pub const fn u16_le(value: u16) -> [u8; 2] {
    [value as u8, (value >> 8) as u8]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert_eq!(init(), vec![0x1B, 0x40]);
    }

    #[test]
    fn test_envelope_markers() {
        assert_eq!(header(), vec![0x1B, 0x40]);
        assert_eq!(end(), vec![0x1B, 0x40]);
        assert_eq!(lf_cr(), vec![0x0A, 0x0D]);
    }

    #[test]
    fn test_cuts() {
        assert_eq!(cut_full(), vec![0x1D, 0x56, 0x00]);
        assert_eq!(cut_partial(), vec![0x1D, 0x56, 0x01]);
        assert_eq!(cut(false), cut_full());
        assert_eq!(cut(true), cut_partial());
    }

    #[test]
    fn test_open_drawer() {
        assert_eq!(open_drawer(), vec![0x1B, 0x70, 0x00, 0x32, 0x7D]);
    }

    #[test]
    fn test_beep_and_self_test() {
        assert_eq!(beep(), vec![0x1B, 0x42, 3, 3]);
        assert_eq!(self_test(), vec![0x1D, 0x28, 0x41, 2, 0, 0, 2]);
    }

    #[test]
    fn test_u16_le() {
        assert_eq!(u16_le(0x0000), [0x00, 0x00]);
        assert_eq!(u16_le(0x00FF), [0xFF, 0x00]);
        assert_eq!(u16_le(0xFF00), [0x00, 0xFF]);
        assert_eq!(u16_le(384), [0x80, 0x01]);
    }
}
