//! Typed messages carried inside frame payloads.
//!
//! Fields stay as the ASCII strings received. Interpreting key types,
//! algorithms and encryption types is the dispatcher's job, so an unfamiliar
//! value still parses and can be answered with a precise error code.

/// Command codes (first two payload characters)
pub mod code {
    pub const LEGACY_INJECT_DUKPT: &str = "00";
    pub const LEGACY_INJECT_MASTER: &str = "01";
    pub const INJECT_SYMMETRIC_KEY: &str = "02";
    pub const READ_SERIAL: &str = "03";
    pub const WRITE_SERIAL: &str = "04";
    pub const DELETE_ALL_KEYS: &str = "05";
    pub const DELETE_SINGLE_KEY: &str = "06";
    pub const UNINSTALL_APP: &str = "07";
    pub const VALIDATE_BRAND: &str = "08";
}

/// Version tag assigned to commands decoded from the legacy `00`/`01` forms.
pub const LEGACY_VERSION: &str = "LG";

/// Encryption type announcing an inline transport key (decimal length variant).
pub const ENC_TYPE_INLINE_KTK: &str = "02";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectKeyCommand {
    pub version: String,
    pub key_slot: u32,
    pub ktk_slot: u32,
    pub key_type: String,
    pub encryption_type: String,
    pub algorithm: String,
    pub key_sub_type: String,
    pub key_checksum: String,
    pub ktk_checksum: String,
    pub ksn: String,
    /// Length field as sent (3 chars, hex or decimal per link variant)
    pub key_length: String,
    pub key_hex: String,
    /// Transport key sent alongside the key (decimal length variant only)
    pub ktk_hex: Option<String>,
    /// Batch bookkeeping trailer: (total keys, index of this key)
    pub batch: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectKeyResponse {
    pub code: String,
    pub key_checksum: String,
    pub device_serial: Option<String>,
    pub device_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    InjectKey(InjectKeyCommand),
    InjectKeyResponse(InjectKeyResponse),
    ReadSerial {
        version: String,
    },
    WriteSerial {
        version: String,
        serial: String,
    },
    DeleteAllKeys {
        version: String,
    },
    DeleteSingleKey {
        version: String,
        slot: u32,
        key_type: String,
    },
    UninstallApp {
        version: String,
        token: String,
    },
    UninstallAppResponse {
        code: String,
        device_serial: Option<String>,
        device_model: Option<String>,
    },
    ValidateBrand {
        version: String,
        expected_device_type: String,
    },
    ValidateBrandResponse {
        code: String,
        actual_device_type: Option<String>,
    },
    Unknown {
        code: String,
        payload: String,
    },
    ParseError {
        raw: Vec<u8>,
        message: String,
    },
}

impl Message {
    /// Two-character command code, when the message has one.
    pub fn command_code(&self) -> Option<&str> {
        Some(match self {
            Message::InjectKey(cmd) if cmd.version == LEGACY_VERSION => {
                if cmd.key_type == "02" {
                    code::LEGACY_INJECT_DUKPT
                } else {
                    code::LEGACY_INJECT_MASTER
                }
            }
            Message::InjectKey(_) | Message::InjectKeyResponse(_) => code::INJECT_SYMMETRIC_KEY,
            Message::ReadSerial { .. } => code::READ_SERIAL,
            Message::WriteSerial { .. } => code::WRITE_SERIAL,
            Message::DeleteAllKeys { .. } => code::DELETE_ALL_KEYS,
            Message::DeleteSingleKey { .. } => code::DELETE_SINGLE_KEY,
            Message::UninstallApp { .. } | Message::UninstallAppResponse { .. } => {
                code::UNINSTALL_APP
            }
            Message::ValidateBrand { .. } | Message::ValidateBrandResponse { .. } => {
                code::VALIDATE_BRAND
            }
            Message::Unknown { code, .. } => code.as_str(),
            Message::ParseError { .. } => return None,
        })
    }

    /// True for messages a terminal receives as replies to its own frames.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Message::InjectKeyResponse(_)
                | Message::UninstallAppResponse { .. }
                | Message::ValidateBrandResponse { .. }
        )
    }
}
