//! TOML configuration file
//!
//! ```toml
//! [adapter]
//! connection = "dev=/dev/ttyACM0"
//! timeout_ms = 5000
//!
//! [can]
//! bitrate = 500000
//!
//! [emulator]
//! chip = "Am29F010"
//! image = "t55.bin"
//! simcr = 0x00CF
//! listen = "127.0.0.1:6116"
//! egt = 412.5
//! ```
//!
//! Every section and key is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AdapterError, Result};
use crate::transport::DEFAULT_TIMEOUT_MS;
use crate::AdapterConnection;

/// Address the emulated adapter listens on by default
pub const DEFAULT_LISTEN: &str = "127.0.0.1:6116";

/// Whole configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterConfig {
    /// Link to the adapter
    pub adapter: LinkSection,
    /// CAN interface
    pub can: CanSection,
    /// Emulated adapter used by `serve`
    pub emulator: EmulatorSection,
}

/// `[adapter]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkSection {
    /// Connection string, `dev=...` or `ip=...`
    pub connection: Option<String>,
    /// Reply timeout in milliseconds
    pub timeout_ms: u32,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            connection: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// `[can]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanSection {
    /// Bitrate set when the bus is opened
    pub bitrate: Option<u32>,
}

/// `[emulator]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmulatorSection {
    /// Flash chip name from the chip database
    pub chip: Option<String>,
    /// Initial flash contents
    pub image: Option<PathBuf>,
    /// SIMCR reset value, overrides the one implied by the chip
    #[serde(deserialize_with = "deserialize_opt_hex_u16")]
    pub simcr: Option<u16>,
    /// TCP address to listen on
    pub listen: String,
    /// Thermocouple reading in degrees Celsius
    pub egt: Option<f32>,
}

impl Default for EmulatorSection {
    fn default() -> Self {
        Self {
            chip: None,
            image: None,
            simcr: None,
            listen: DEFAULT_LISTEN.to_string(),
            egt: None,
        }
    }
}

impl AdapterConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AdapterError::Config(e.to_string()))
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| AdapterError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parsed `[adapter] connection`, if set
    pub fn connection(&self) -> Result<Option<AdapterConnection>> {
        self.adapter
            .connection
            .as_deref()
            .map(AdapterConnection::parse)
            .transpose()
            .map_err(AdapterError::Config)
    }
}

/// Deserialize an optional u16 that can be hex (0x...) or decimal
fn deserialize_opt_hex_u16<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u16),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(Some(n)),
        HexOrInt::Str(s) => parse_number(&s)
            .and_then(|n| u16::try_from(n).map_err(|_| format!("out of range: {}", s)))
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}
