//! # Command Buffer
//!
//! Ordered, not-yet-transmitted printer bytes for one session. Content and
//! formatting calls append; nothing here talks to a transport. A flush wraps
//! the whole buffer in the protocol envelope:
//!
//! ```text
//! header │ charset directive │ buffer bytes │ LF CR × 3 │ end marker
//! ```

use crate::error::Result;
use crate::format::FormattingState;
use crate::protocol::CommandEncoder;
use crate::protocol::charset::TextEncoding;

/// Number of LF/CR pairs closing every envelope.
pub const TERMINATOR_COUNT: usize = 3;

/// Append-only byte sequence for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Append already-encoded bytes.
    pub fn extend(&mut self, bytes: impl AsRef<[u8]>) {
        self.bytes.extend_from_slice(bytes.as_ref());
    }

    /// Append the output of a fallible encoder call.
    ///
    /// Nothing is appended on error, so earlier contents stay intact.
    pub fn append(&mut self, encoded: Result<Vec<u8>>) -> Result<()> {
        self.bytes.extend(encoded?);
        Ok(())
    }

    /// Append the layout commands that establish `state`'s baseline.
    pub fn apply_layout(&mut self, encoder: &dyn CommandEncoder, state: &FormattingState) {
        self.extend(encoder.align(state.alignment));
        self.extend(encoder.line_spacing(state.line_spacing));
        self.extend(encoder.char_spacing(state.char_spacing));
    }

    /// Wrap the buffer in the protocol envelope.
    pub fn envelope(&self, encoder: &dyn CommandEncoder, encoding: TextEncoding) -> Vec<u8> {
        let header = encoder.header();
        let charset = encoder.charset(encoding);
        let terminator = encoder.terminator();
        let end = encoder.end();

        let mut out = Vec::with_capacity(
            header.len()
                + charset.len()
                + self.bytes.len()
                + terminator.len() * TERMINATOR_COUNT
                + end.len(),
        );
        out.extend(header);
        out.extend(charset);
        out.extend_from_slice(&self.bytes);
        for _ in 0..TERMINATOR_COUNT {
            out.extend_from_slice(&terminator);
        }
        out.extend(end);
        out
    }
}
