//! # Text Encodings
//!
//! Chinese thermal printers expect GBK in double-byte mode; newer firmware
//! also accepts UTF-8. The session's encoding is chosen at connect time and
//! can be changed later; it only affects text encoded after the change.
//!
//! | Encoding | Directive | Text bytes |
//! |----------|-----------|------------|
//! | GBK | FS & FS C 1 | `encoding_rs::GBK` |
//! | UTF-8 | FS . | UTF-8 as-is |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::commands::FS;
use crate::error::{Result, ThermolinkError};

/// Text encodings a session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    /// GBK, the widest CJK coverage on this class of printer
    #[default]
    #[serde(rename = "GBK")]
    Gbk,
    #[serde(rename = "UTF-8")]
    Utf8,
}

impl TextEncoding {
    /// Canonical tag as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gbk => "GBK",
            Self::Utf8 => "UTF-8",
        }
    }

    /// Lenient parse used when connecting: unknown or missing tags fall back
    /// to the default encoding instead of failing the connection.
    pub fn or_default(tag: Option<&str>) -> Self {
        tag.and_then(|t| t.parse().ok()).unwrap_or_default()
    }

    /// Charset directive placed in the envelope ahead of the payload.
    pub fn directive(self) -> Vec<u8> {
        match self {
            // FS & (enter double-byte mode), FS C 1 (select GBK)
            Self::Gbk => vec![FS, b'&', FS, b'C', 0x01],
            // FS . (leave double-byte mode)
            Self::Utf8 => vec![FS, b'.'],
        }
    }

    /// Encode text for this charset.
    ///
    /// Characters GBK cannot represent are an error rather than being
    /// silently replaced.
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Gbk => {
                let (bytes, _, had_errors) = encoding_rs::GBK.encode(text);
                if had_errors {
                    return Err(ThermolinkError::Encoding(format!(
                        "text contains characters not representable in GBK: {:?}",
                        text
                    )));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

impl FromStr for TextEncoding {
    type Err = ThermolinkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GBK" => Ok(Self::Gbk),
            "UTF-8" => Ok(Self::Utf8),
            other => Err(ThermolinkError::InvalidArgument(format!(
                "invalid encoding '{}'. Use 'GBK' or 'UTF-8'.",
                other
            ))),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
