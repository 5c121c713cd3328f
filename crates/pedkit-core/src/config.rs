use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PedkitError, PedkitResult};

/// Top-level configuration (loaded from pedkit.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PedkitConfig {
    pub daemon: DaemonConfig,
    pub link: LinkConfig,
    pub ped: PedConfig,
    pub store: StoreConfig,
    pub kek: KekConfig,
    pub ceremony: CeremonyConfig,
}

impl PedkitConfig {
    /// Reject values the runtime cannot honour.
    pub fn validate(&self) -> PedkitResult<()> {
        if self.link.max_buffer_bytes < 512 {
            return Err(PedkitError::Config(format!(
                "link.max_buffer_bytes must be at least 512 (got {})",
                self.link.max_buffer_bytes
            )));
        }
        if self.link.device_serial.len() != 16 {
            return Err(PedkitError::Config(format!(
                "link.device_serial must be 16 characters (got {})",
                self.link.device_serial.len()
            )));
        }
        if !matches!(self.kek.default_length, 16 | 24 | 32) {
            return Err(PedkitError::Config(format!(
                "kek.default_length must be 16, 24 or 32 (got {})",
                self.kek.default_length
            )));
        }
        if !matches!(self.ceremony.default_custodians, 2 | 3) {
            return Err(PedkitError::Config(format!(
                "ceremony.default_custodians must be 2 or 3 (got {})",
                self.ceremony.default_custodians
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// How the inject command encodes its 3-character key length field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLengthEncoding {
    /// Hex digits counting key bytes (current hosts)
    #[default]
    HexBytes,
    /// Decimal digits counting hex characters, with optional inline KTK
    DecimalChars,
}

/// Device family reported to the host by brand validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceBrand {
    Aisino,
    Newpos,
    Urovo,
    #[default]
    Unknown,
}

impl DeviceBrand {
    /// Two-character wire code used by the brand validation command.
    pub fn wire_code(self) -> &'static str {
        match self {
            DeviceBrand::Aisino => "00",
            DeviceBrand::Newpos => "01",
            DeviceBrand::Urovo => "02",
            DeviceBrand::Unknown => "FF",
        }
    }

    pub fn from_wire_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "00" => DeviceBrand::Aisino,
            "01" => DeviceBrand::Newpos,
            "02" => DeviceBrand::Urovo,
            _ => DeviceBrand::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path (e.g. /dev/ttyS1)
    pub device: Option<PathBuf>,
    /// TCP listen address for bench injectors (optional)
    pub listen: Option<String>,
    /// Frame Codec accumulation cap in bytes
    pub max_buffer_bytes: usize,
    /// Key length field encoding of the inject command
    pub key_length_encoding: KeyLengthEncoding,
    /// 16-character serial reported by the read-serial command
    pub device_serial: String,
    /// Brand reported by the validate-brand command
    pub device_brand: DeviceBrand,
}

/// Which PED adapter backs the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PedVendor {
    #[default]
    Simulated,
    Aisino,
    Newpos,
    Urovo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PedConfig {
    /// Hardware adapter
    pub vendor: PedVendor,
    /// Seconds added to the caller's PIN timeout before the engine gives up
    pub pin_timeout_guard_secs: u64,
    /// Highest addressable key slot
    pub max_slot: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON key store path
    pub path: PathBuf,
    /// Seal key material under the active KEK when one exists
    pub encrypt_at_rest: bool,
    /// Run the legacy plaintext migration pass on startup
    pub migrate_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KekConfig {
    /// Platform keychain service name
    pub service_name: String,
    /// Length of generated KEKs in bytes (16, 24 or 32)
    pub default_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CeremonyConfig {
    /// Custodian count when not given on the command line
    pub default_custodians: u8,
    /// Seconds a custodian has to enter a component
    pub component_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            listen: None,
            max_buffer_bytes: 64 * 1024,
            key_length_encoding: KeyLengthEncoding::HexBytes,
            device_serial: "0000000000000000".into(),
            device_brand: DeviceBrand::Unknown,
        }
    }
}

impl Default for PedConfig {
    fn default() -> Self {
        Self {
            vendor: PedVendor::Simulated,
            pin_timeout_guard_secs: 5,
            max_slot: 99,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/pedkit/keys.json"),
            encrypt_at_rest: true,
            migrate_on_start: true,
        }
    }
}

impl Default for KekConfig {
    fn default() -> Self {
        Self {
            service_name: "pedkit".into(),
            default_length: 32,
        }
    }
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        Self {
            default_custodians: 2,
            component_timeout_secs: 300,
        }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => {
                tracing::warn!(path = %path.display(), "HOME not set, using path verbatim");
                path.to_path_buf()
            }
        },
        Err(_) => path.to_path_buf(),
    }
}
