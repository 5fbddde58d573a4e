//! # Printer Sessions
//!
//! A session is one logical conversation with one physical printer. The
//! registry owns its identity and lifecycle state (they change together with
//! the registry's indexes); the [`Session`] value here owns the formatting
//! state and command buffer, and is locked per session so that a flush never
//! observes a half-applied operation.
//!
//! ## Operations
//!
//! Formatting and content calls are modelled as [`Operation`] values so the
//! HTTP and CLI surfaces can ship them as JSON:
//!
//! ```json
//! [
//!   {"op": "align", "alignment": "center"},
//!   {"op": "bold"},
//!   {"op": "text", "text": "RECEIPT\n"},
//!   {"op": "barcode", "type": "CODE128", "data": "A-1001"},
//!   {"op": "cut_paper", "half": true}
//! ]
//! ```

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::buffer::CommandBuffer;
use crate::error::{Result, ThermolinkError};
use crate::format::FormattingState;
use crate::protocol::CommandEncoder;
use crate::protocol::barcode::barcode1d::{BarcodeType, HriPosition};
use crate::protocol::charset::TextEncoding;
use crate::protocol::graphics;
use crate::protocol::text::{Alignment, Font, Toggle};

/// QR module size in dots.
pub const DEFAULT_QR_MODULE_SIZE: u8 = 6;

// ============================================================================
// IDENTITY
// ============================================================================

/// Process-unique session id. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = ThermolinkError;

    /// Strings that are not ids can never name a session.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ThermolinkError::UnknownSession)
    }
}

/// Lifecycle of a session.
///
/// ```text
/// Pending ──Success──► Active ──Interrupted──► Closed
///    └────────────Interrupted / failure──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Pending,
    Active,
    Closed,
}

/// The only view of a session exposed outside the crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterConnection {
    pub connection_id: SessionId,
    pub address: String,
    pub name: String,
}

// ============================================================================
// OPERATIONS
// ============================================================================

fn enabled() -> Toggle {
    Toggle::Enable
}

fn default_font() -> String {
    "A".to_string()
}

/// Bytes for [`Operation::Raw`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawData {
    /// Base64-encoded bytes
    Base64(String),
    /// Integers, each masked to its low byte
    Bytes(Vec<i64>),
}

impl RawData {
    pub fn decode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Base64(text) => STANDARD
                .decode(text)
                .map_err(|_| ThermolinkError::InvalidArgument("invalid base64".to_string())),
            Self::Bytes(values) => Ok(values.iter().map(|v| (v & 0xFF) as u8).collect()),
        }
    }
}

/// A formatting or content call against one session.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Operation {
    // Text formatting
    Bold {
        #[serde(default = "enabled")]
        enabled: Toggle,
    },
    Underline {
        #[serde(default = "enabled")]
        enabled: Toggle,
    },
    DoubleWidth {
        #[serde(default = "enabled")]
        enabled: Toggle,
    },
    DoubleHeight {
        #[serde(default = "enabled")]
        enabled: Toggle,
    },
    Inverse {
        #[serde(default = "enabled")]
        enabled: Toggle,
    },
    SetEncoding {
        encoding: String,
    },

    // Image formatting
    Dpi {
        #[serde(default)]
        dpi: Option<i64>,
    },
    LimitWidth {
        #[serde(default)]
        width: Option<i64>,
    },

    // Layout
    Align {
        alignment: String,
    },
    LineSpacing {
        #[serde(default)]
        line_spacing: i64,
    },
    CharSpacing {
        #[serde(default)]
        char_spacing: i64,
    },
    Font {
        #[serde(default = "default_font")]
        font: String,
    },
    ClearFormatting,

    // Barcode formatting
    BarcodeWidth {
        #[serde(default)]
        width: i64,
    },
    BarcodeHeight {
        #[serde(default)]
        height: Option<i64>,
    },
    BarcodeTextPlacement {
        placement: String,
    },

    // Content
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    Image {
        #[serde(default)]
        image: Option<String>,
    },
    Raw {
        data: RawData,
    },
    Qr {
        #[serde(default)]
        data: String,
        #[serde(default)]
        size: Option<u8>,
    },
    Barcode {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        data: String,
    },
    SelfTest,
    Beep,
    OpenDrawer,
    CutPaper {
        #[serde(default)]
        half: bool,
    },
    FeedCutPaper {
        #[serde(default)]
        half: bool,
    },
}

impl Operation {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bold { .. } => "bold",
            Self::Underline { .. } => "underline",
            Self::DoubleWidth { .. } => "double_width",
            Self::DoubleHeight { .. } => "double_height",
            Self::Inverse { .. } => "inverse",
            Self::SetEncoding { .. } => "set_encoding",
            Self::Dpi { .. } => "dpi",
            Self::LimitWidth { .. } => "limit_width",
            Self::Align { .. } => "align",
            Self::LineSpacing { .. } => "line_spacing",
            Self::CharSpacing { .. } => "char_spacing",
            Self::Font { .. } => "font",
            Self::ClearFormatting => "clear_formatting",
            Self::BarcodeWidth { .. } => "barcode_width",
            Self::BarcodeHeight { .. } => "barcode_height",
            Self::BarcodeTextPlacement { .. } => "barcode_text_placement",
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Raw { .. } => "raw",
            Self::Qr { .. } => "qr",
            Self::Barcode { .. } => "barcode",
            Self::SelfTest => "self_test",
            Self::Beep => "beep",
            Self::OpenDrawer => "open_drawer",
            Self::CutPaper { .. } => "cut_paper",
            Self::FeedCutPaper { .. } => "feed_cut_paper",
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Formatting state and command buffer of one printer session.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    formatting: FormattingState,
    buffer: CommandBuffer,
}

impl Session {
    /// Fresh session: baseline formatting, empty buffer.
    pub fn new(id: SessionId, encoding: TextEncoding) -> Self {
        Self {
            id,
            formatting: FormattingState::with_encoding(encoding),
            buffer: CommandBuffer::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn formatting(&self) -> &FormattingState {
        &self.formatting
    }

    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }

    pub fn encoding(&self) -> TextEncoding {
        self.formatting.encoding
    }

    /// Start a new job: a new buffer holding only the baseline layout.
    pub fn begin(&mut self, encoder: &dyn CommandEncoder) {
        self.buffer = CommandBuffer::new();
        self.clear_formatting(encoder);
    }

    /// Reset formatting to the baseline and append its layout commands.
    pub fn clear_formatting(&mut self, encoder: &dyn CommandEncoder) {
        self.formatting.reset();
        self.buffer.apply_layout(encoder, &self.formatting);
    }

    /// The buffer wrapped in the protocol envelope.
    pub fn envelope(&self, encoder: &dyn CommandEncoder) -> Vec<u8> {
        self.buffer.envelope(encoder, self.formatting.encoding)
    }

    /// Apply one operation.
    ///
    /// A failing operation leaves both formatting and buffer untouched.
    pub fn apply(&mut self, encoder: &dyn CommandEncoder, op: &Operation) -> Result<()> {
        let state = &mut self.formatting;
        match op {
            Operation::Bold { enabled } => state.text.bold = *enabled,
            Operation::Underline { enabled } => state.text.underline = *enabled,
            Operation::DoubleWidth { enabled } => state.text.double_width = *enabled,
            Operation::DoubleHeight { enabled } => state.text.double_height = *enabled,
            Operation::Inverse { enabled } => state.text.inverse = *enabled,
            Operation::SetEncoding { encoding } => state.encoding = encoding.parse()?,

            Operation::Dpi { dpi } => state.set_dpi(dpi.unwrap_or(0)),
            Operation::LimitWidth { width } => {
                state.set_bitmap_width(width.unwrap_or(0));
            }

            Operation::Align { alignment } => {
                let alignment: Alignment = alignment.parse()?;
                state.alignment = alignment;
                self.buffer.extend(encoder.align(alignment));
            }
            Operation::LineSpacing { line_spacing } => {
                let spacing = state.set_line_spacing(*line_spacing);
                self.buffer.extend(encoder.line_spacing(spacing));
            }
            Operation::CharSpacing { char_spacing } => {
                let spacing = state.set_char_spacing(*char_spacing);
                self.buffer.extend(encoder.char_spacing(spacing));
            }
            Operation::Font { font } => {
                let font: Font = font.parse()?;
                state.text.font = font;
                state.barcode.font = font;
            }
            Operation::ClearFormatting => self.clear_formatting(encoder),

            Operation::BarcodeWidth { width } => state.set_barcode_width(*width),
            Operation::BarcodeHeight { height } => {
                if let Some(height) = height {
                    state.set_barcode_height(*height);
                }
            }
            Operation::BarcodeTextPlacement { placement } => {
                state.barcode.text_placement = placement.parse::<HriPosition>()?;
            }

            Operation::Text { text } => {
                if let Some(text) = text {
                    self.buffer.append(encoder.text(state, text))?;
                }
            }
            Operation::Image { image } => {
                if let Some(image) = image {
                    let decoded = graphics::decode_image(image)?;
                    self.buffer.append(encoder.bitmap(state, &decoded))?;
                }
            }
            Operation::Raw { data } => self.buffer.extend(data.decode()?),
            Operation::Qr { data, size } => {
                let size = size.unwrap_or(DEFAULT_QR_MODULE_SIZE);
                self.buffer.append(encoder.qr(state, data, size))?;
            }
            Operation::Barcode { kind, data } => {
                let kind: BarcodeType = kind.parse()?;
                self.buffer.append(encoder.barcode(state, kind, data))?;
            }
            Operation::SelfTest => self.buffer.extend(encoder.self_test()),
            Operation::Beep => self.buffer.extend(encoder.beep()),
            Operation::OpenDrawer => self.buffer.extend(encoder.open_drawer()),
            Operation::CutPaper { half } => self.buffer.extend(encoder.cut(*half)),
            Operation::FeedCutPaper { half } => {
                self.buffer.extend(encoder.feed(1));
                self.buffer.extend(encoder.cut(*half));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EscPosEncoder;
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::new(SessionId::new(), TextEncoding::Gbk)
    }

    fn op(json: &str) -> Operation {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_operation_json() {
        assert_eq!(op(r#"{"op":"bold"}"#), Operation::Bold { enabled: Toggle::Enable });
        assert_eq!(
            op(r#"{"op":"underline","enabled":"default"}"#),
            Operation::Underline { enabled: Toggle::NoSetting }
        );
        assert_eq!(
            op(r#"{"op":"line_spacing","lineSpacing":40}"#),
            Operation::LineSpacing { line_spacing: 40 }
        );
        assert_eq!(
            op(r#"{"op":"barcode","type":"EAN8","data":"9638507"}"#),
            Operation::Barcode { kind: "EAN8".into(), data: "9638507".into() }
        );
        assert_eq!(
            op(r#"{"op":"raw","data":[27,64,256]}"#),
            Operation::Raw { data: RawData::Bytes(vec![27, 64, 256]) }
        );
    }

    #[test]
    fn test_begin_writes_baseline() {
        let mut s = session();
        s.apply(&EscPosEncoder, &op(r#"{"op":"text","text":"junk"}"#)).unwrap();

        s.begin(&EscPosEncoder);
        assert_eq!(
            s.buffer().as_bytes(),
            &[0x1B, 0x61, 0, 0x1B, 0x33, 30, 0x1B, 0x20, 1]
        );
    }

    #[test]
    fn test_align_round_trip() {
        let mut s = session();
        s.apply(&EscPosEncoder, &op(r#"{"op":"align","alignment":"left"}"#)).unwrap();
        s.apply(&EscPosEncoder, &op(r#"{"op":"align","alignment":"center"}"#)).unwrap();
        assert_eq!(s.buffer().as_bytes(), &[0x1B, 0x61, 0, 0x1B, 0x61, 1]);
    }

    #[test]
    fn test_invalid_alignment_rejected() {
        let mut s = session();
        let err = s
            .apply(&EscPosEncoder, &op(r#"{"op":"align","alignment":"justify"}"#))
            .unwrap_err();
        assert!(matches!(err, ThermolinkError::InvalidArgument(_)));
        assert!(s.buffer().is_empty());
    }

    #[test]
    fn test_line_spacing_clamped() {
        let mut s = session();
        s.apply(&EscPosEncoder, &Operation::LineSpacing { line_spacing: 300 }).unwrap();
        assert_eq!(s.formatting().line_spacing, 255);
        s.apply(&EscPosEncoder, &Operation::LineSpacing { line_spacing: -5 }).unwrap();
        assert_eq!(s.formatting().line_spacing, 0);
        assert_eq!(s.buffer().as_bytes(), &[0x1B, 0x33, 255, 0x1B, 0x33, 0]);
    }

    #[test]
    fn test_new_session_identity() {
        let id = SessionId::new();
        let s = Session::new(id, TextEncoding::Utf8);
        assert_eq!(s.id(), id);
        assert_eq!(s.encoding(), TextEncoding::Utf8);
        assert!(s.buffer().as_bytes().is_empty());
    }

    #[test]
    fn test_limit_width_ignores_dpi() {
        let mut s = session();
        s.apply(&EscPosEncoder, &Operation::Dpi { dpi: Some(300) }).unwrap();
        s.apply(&EscPosEncoder, &Operation::LimitWidth { width: Some(10) }).unwrap();
        assert_eq!(s.formatting().bitmap.width_limit, 80);
    }

    #[test]
    fn test_limit_width() {
        let mut s = session();
        s.apply(&EscPosEncoder, &Operation::LimitWidth { width: Some(48) }).unwrap();
        assert_eq!(s.formatting().bitmap.width_limit, 384);
        s.apply(&EscPosEncoder, &Operation::LimitWidth { width: Some(0) }).unwrap();
        assert_eq!(s.formatting().bitmap.width_limit, 0);
    }

    #[test]
    fn test_font_applies_to_barcode() {
        let mut s = session();
        s.apply(&EscPosEncoder, &op(r#"{"op":"font","font":"B"}"#)).unwrap();
        assert_eq!(s.formatting().text.font, Font::B);
        assert_eq!(s.formatting().barcode.font, Font::B);
        assert!(s.apply(&EscPosEncoder, &op(r#"{"op":"font","font":"C"}"#)).is_err());
    }

    #[test]
    fn test_set_encoding() {
        let mut s = session();
        s.apply(&EscPosEncoder, &op(r#"{"op":"set_encoding","encoding":"UTF-8"}"#)).unwrap();
        assert_eq!(s.encoding(), TextEncoding::Utf8);

        let err = s
            .apply(&EscPosEncoder, &op(r#"{"op":"set_encoding","encoding":"latin1"}"#))
            .unwrap_err();
        assert!(matches!(err, ThermolinkError::InvalidArgument(_)));
        assert_eq!(s.encoding(), TextEncoding::Utf8);
    }

    #[test]
    fn test_encoding_survives_begin() {
        let mut s = Session::new(SessionId::new(), TextEncoding::Utf8);
        s.begin(&EscPosEncoder);
        assert_eq!(s.encoding(), TextEncoding::Utf8);
    }

    #[test]
    fn test_barcode_rejects_qr_type() {
        let mut s = session();
        let err = s
            .apply(&EscPosEncoder, &op(r#"{"op":"barcode","type":"QR","data":"x"}"#))
            .unwrap_err();
        assert!(matches!(err, ThermolinkError::InvalidArgument(_)));
    }

    #[test]
    fn test_encoding_error_keeps_buffer() {
        let mut s = session();
        s.apply(&EscPosEncoder, &Operation::Beep).unwrap();
        let before = s.buffer().clone();

        let err = s
            .apply(&EscPosEncoder, &op(r#"{"op":"barcode","type":"EAN13","data":"12"}"#))
            .unwrap_err();
        assert!(matches!(err, ThermolinkError::Encoding(_)));
        assert_eq!(s.buffer(), &before);
    }

    #[test]
    fn test_raw_masks_bytes() {
        let mut s = session();
        s.apply(&EscPosEncoder, &op(r#"{"op":"raw","data":[27,64,256,-1]}"#)).unwrap();
        assert_eq!(s.buffer().as_bytes(), &[27, 64, 0, 255]);

        s.apply(&EscPosEncoder, &op(r#"{"op":"raw","data":"G0A="}"#)).unwrap();
        assert_eq!(&s.buffer().as_bytes()[4..], &[0x1B, 0x40]);

        assert!(s.apply(&EscPosEncoder, &op(r#"{"op":"raw","data":"%%%"}"#)).is_err());
    }

    #[test]
    fn test_feed_cut_and_drawer() {
        let mut s = session();
        s.apply(&EscPosEncoder, &op(r#"{"op":"feed_cut_paper","half":true}"#)).unwrap();
        s.apply(&EscPosEncoder, &Operation::OpenDrawer).unwrap();
        assert_eq!(
            s.buffer().as_bytes(),
            &[0x0A, 0x1D, 0x56, 1, 0x1B, 0x70, 0x00, 0x32, 0x7D]
        );
    }

    #[test]
    fn test_invalid_image() {
        let mut s = session();
        let err = s
            .apply(&EscPosEncoder, &op(r#"{"op":"image","image":"data:image/png;base64,AAAA"}"#))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: invalid image");
    }

    #[test]
    fn test_null_payloads_are_noops() {
        let mut s = session();
        s.apply(&EscPosEncoder, &op(r#"{"op":"text"}"#)).unwrap();
        s.apply(&EscPosEncoder, &op(r#"{"op":"image"}"#)).unwrap();
        s.apply(&EscPosEncoder, &op(r#"{"op":"barcode_height"}"#)).unwrap();
        assert!(s.buffer().is_empty());
        assert_eq!(s.formatting().barcode.height, 72);
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!(matches!(
            "printer-1".parse::<SessionId>(),
            Err(ThermolinkError::UnknownSession)
        ));
    }

    #[test]
    fn test_identity_json() {
        let id = SessionId::new();
        let conn = PrinterConnection {
            connection_id: id,
            address: "AA:BB".into(),
            name: "RPP02N".into(),
        };
        let json = serde_json::to_value(&conn).unwrap();
        assert_eq!(json["connectionId"], id.to_string());
        assert_eq!(json["name"], "RPP02N");
    }
}
