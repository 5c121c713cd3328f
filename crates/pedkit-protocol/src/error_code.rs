//! Closed table of response codes.
//!
//! Membership in this table is what distinguishes a short response payload
//! from a command sharing the same command code, so it must not grow
//! without the hosts growing with it.

/// Response code carried in the third and fourth payload characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Successful,
    InvalidCommand,
    InvalidCommandVersion,
    InvalidLength,
    UnsupportedCharacters,
    DeviceIsBusy,
    NotInInjectionMode,
    DeviceIsInTamper,
    BadLrc,
    DuplicateKey,
    DuplicateKsn,
    KeyDeletionFailed,
    InvalidKeySlot,
    InvalidKtkSlot,
    MissingKtk,
    KeySlotNotEmpty,
    InvalidKeyType,
    InvalidKeyEncryptionType,
    InvalidKeyChecksum,
    InvalidKtkChecksum,
    InvalidKsn,
    InvalidKeyLength,
    InvalidKtkLength,
    InvalidTr31Version,
    InvalidKeyUsage,
    InvalidAlgorithm,
    InvalidModeOfUse,
    MacVerificationFailed,
    DecryptionFailed,
}

const TABLE: &[(ErrorCode, &str, &str)] = &[
    (ErrorCode::Successful, "00", "SUCCESSFUL"),
    (ErrorCode::InvalidCommand, "01", "INVALID_COMMAND"),
    (ErrorCode::InvalidCommandVersion, "02", "INVALID_COMMAND_VERSION"),
    (ErrorCode::InvalidLength, "03", "INVALID_LENGTH"),
    (ErrorCode::UnsupportedCharacters, "04", "UNSUPPORTED_CHARACTERS"),
    (ErrorCode::DeviceIsBusy, "05", "DEVICE_IS_BUSY"),
    (ErrorCode::NotInInjectionMode, "06", "NOT_IN_INJECTION_MODE"),
    (ErrorCode::DeviceIsInTamper, "07", "DEVICE_IS_IN_TAMPER"),
    (ErrorCode::BadLrc, "08", "BAD_LRC"),
    (ErrorCode::DuplicateKey, "09", "DUPLICATE_KEY"),
    (ErrorCode::DuplicateKsn, "0A", "DUPLICATE_KSN"),
    (ErrorCode::KeyDeletionFailed, "0B", "KEY_DELETION_FAILED"),
    (ErrorCode::InvalidKeySlot, "0C", "INVALID_KEY_SLOT"),
    (ErrorCode::InvalidKtkSlot, "0D", "INVALID_KTK_SLOT"),
    (ErrorCode::MissingKtk, "0E", "MISSING_KTK"),
    (ErrorCode::KeySlotNotEmpty, "0F", "KEY_SLOT_NOT_EMPTY"),
    (ErrorCode::InvalidKeyType, "10", "INVALID_KEY_TYPE"),
    (ErrorCode::InvalidKeyEncryptionType, "11", "INVALID_KEY_ENCRYPTION_TYPE"),
    (ErrorCode::InvalidKeyChecksum, "12", "INVALID_KEY_CHECKSUM"),
    (ErrorCode::InvalidKtkChecksum, "13", "INVALID_KTK_CHECKSUM"),
    (ErrorCode::InvalidKsn, "14", "INVALID_KSN"),
    (ErrorCode::InvalidKeyLength, "15", "INVALID_KEY_LENGTH"),
    (ErrorCode::InvalidKtkLength, "16", "INVALID_KTK_LENGTH"),
    (ErrorCode::InvalidTr31Version, "17", "INVALID_TR31_VERSION"),
    (ErrorCode::InvalidKeyUsage, "18", "INVALID_KEY_USAGE"),
    (ErrorCode::InvalidAlgorithm, "19", "INVALID_ALGORITHM"),
    (ErrorCode::InvalidModeOfUse, "1A", "INVALID_MODE_OF_USE"),
    (ErrorCode::MacVerificationFailed, "1B", "MAC_VERIFICATION_FAILED"),
    (ErrorCode::DecryptionFailed, "1C", "DECRYPTION_FAILED"),
];

/// Reply code for a brand validation mismatch. Not a member of the table.
pub const BRAND_MISMATCH: &str = "2A";

impl ErrorCode {
    /// Look up a two-character code, ignoring case.
    pub fn from_code(code: &str) -> Option<Self> {
        TABLE
            .iter()
            .find(|(_, c, _)| c.eq_ignore_ascii_case(code))
            .map(|(e, _, _)| *e)
    }

    pub fn code(self) -> &'static str {
        self.entry().1
    }

    pub fn name(self) -> &'static str {
        self.entry().2
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Successful
    }

    fn entry(self) -> &'static (ErrorCode, &'static str, &'static str) {
        // TABLE is exhaustive over the enum
        TABLE
            .iter()
            .find(|(e, _, _)| *e == self)
            .unwrap_or(&TABLE[0])
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
