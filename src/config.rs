//! # Link Configuration
//!
//! Optional TOML file tuning the adapter side of thermolink. Every key has a
//! default, so an empty or missing file is valid:
//!
//! ```toml
//! # Encoding new connections start with: "GBK" or "UTF-8"
//! encoding = "GBK"
//!
//! [rfcomm]
//! first_device = 0      # bind /dev/rfcommN starting at N = 0
//! channel = 1           # SPP channel on the printer
//! chunk_size = 4096
//! chunk_delay_ms = 2
//!
//! [discovery]
//! timeout_secs = 12
//!
//! [server]
//! listen = "127.0.0.1:8080"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ThermolinkError};
use crate::protocol::charset::TextEncoding;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Encoding used when `connect` is not given one.
    pub encoding: String,
    pub rfcomm: RfcommConfig,
    pub discovery: DiscoveryConfig,
    pub server: ServerConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::default().as_str().to_string(),
            rfcomm: RfcommConfig::default(),
            discovery: DiscoveryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfcommConfig {
    /// Lowest `/dev/rfcommN` index thermolink may bind.
    pub first_device: u8,
    /// Remote RFCOMM channel (1 for SPP on nearly every printer).
    pub channel: u8,
    /// Largest single `write(2)`.
    pub chunk_size: usize,
    /// Pause between chunks.
    pub chunk_delay_ms: u64,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            first_device: 0,
            channel: 1,
            chunk_size: 4096,
            chunk_delay_ms: 2,
        }
    }
}

impl RfcommConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { timeout_secs: 12 }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

impl LinkConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| ThermolinkError::Config(format!("{}: {}", path.display(), e))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ThermolinkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Encoding for new connections; an unrecognised name falls back to GBK.
    pub fn default_encoding(&self) -> TextEncoding {
        TextEncoding::or_default(Some(&self.encoding))
    }

    fn validate(&self) -> Result<()> {
        if self.rfcomm.chunk_size == 0 {
            return Err(ThermolinkError::Config(
                "rfcomm.chunk_size must be positive".to_string(),
            ));
        }
        if self.rfcomm.channel == 0 || self.rfcomm.channel > 30 {
            return Err(ThermolinkError::Config(format!(
                "rfcomm.channel {} is outside 1..=30",
                self.rfcomm.channel
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_defaults() {
        assert_eq!(LinkConfig::parse("").unwrap(), LinkConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = LinkConfig::parse(
            r#"
            encoding = "UTF-8"
            [rfcomm]
            chunk_size = 512
            "#,
        )
        .unwrap();
        assert_eq!(config.default_encoding(), TextEncoding::Utf8);
        assert_eq!(config.rfcomm.chunk_size, 512);
        assert_eq!(config.rfcomm.channel, 1);
        assert_eq!(config.discovery.timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_unknown_encoding_falls_back() {
        let config = LinkConfig::parse("encoding = \"latin1\"").unwrap();
        assert_eq!(config.default_encoding(), TextEncoding::Gbk);
    }

    #[test]
    fn test_malformed_file() {
        assert!(matches!(
            LinkConfig::parse("encoding = ["),
            Err(ThermolinkError::Config(_))
        ));
        assert!(matches!(
            LinkConfig::parse("[rfcomm]\nchunk_size = 0"),
            Err(ThermolinkError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let config = LinkConfig::load(Path::new("/nonexistent/thermolink.toml")).unwrap();
        assert_eq!(config, LinkConfig::default());
    }
}
