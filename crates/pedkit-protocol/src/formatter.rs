//! Builders for outbound payloads and frames.
//!
//! Fields are concatenated without separators; widths are fixed by the
//! command layout, so callers pass already padded strings.

use pedkit_core::config::KeyLengthEncoding;

use crate::error_code::{ErrorCode, BRAND_MISMATCH};
use crate::frame::encode_frame;
use crate::message::{code, InjectKeyCommand};

/// Version field hosts put on the brand validation command.
pub const BRAND_COMMAND_VERSION: &str = "AA";

/// `code ‖ fields…` as ASCII bytes.
pub fn payload(command: &str, fields: &[&str]) -> Vec<u8> {
    let len = command.len() + fields.iter().map(|f| f.len()).sum::<usize>();
    let mut out = String::with_capacity(len);
    out.push_str(command);
    for field in fields {
        out.push_str(field);
    }
    out.into_bytes()
}

/// Complete frame for `code ‖ fields…`.
pub fn format(command: &str, fields: &[&str]) -> Vec<u8> {
    encode_frame(&payload(command, fields))
}

/// First four characters of a checksum, right-padded with `0` when short.
fn wire_checksum(kcv: &str) -> String {
    let mut s: String = kcv.chars().take(4).collect();
    while s.len() < 4 {
        s.push('0');
    }
    s.to_ascii_uppercase()
}

// ── Terminal → host responses ─────────────────────────────────────────────────

pub fn inject_key_response(result: ErrorCode, kcv: &str) -> Vec<u8> {
    format(
        code::INJECT_SYMMETRIC_KEY,
        &[result.code(), &wire_checksum(kcv)],
    )
}

pub fn read_serial_response(result: ErrorCode, serial: &str) -> Vec<u8> {
    format(code::READ_SERIAL, &[result.code(), serial])
}

pub fn write_serial_response(result: ErrorCode) -> Vec<u8> {
    format(code::WRITE_SERIAL, &[result.code()])
}

pub fn delete_all_response(result: ErrorCode) -> Vec<u8> {
    format(code::DELETE_ALL_KEYS, &[result.code()])
}

pub fn delete_single_response(result: ErrorCode) -> Vec<u8> {
    format(code::DELETE_SINGLE_KEY, &[result.code()])
}

pub fn uninstall_response(result: ErrorCode) -> Vec<u8> {
    format(code::UNINSTALL_APP, &[result.code()])
}

/// `08 00` on a match, `08 2A <actual>` otherwise.
pub fn brand_response(matched: bool, actual_device_type: &str) -> Vec<u8> {
    if matched {
        format(code::VALIDATE_BRAND, &[ErrorCode::Successful.code()])
    } else {
        format(code::VALIDATE_BRAND, &[BRAND_MISMATCH, actual_device_type])
    }
}

// ── Host → terminal commands (bench tools and tests) ──────────────────────────

/// Serialize an inject command, recomputing the length field for `encoding`.
pub fn inject_key_command(cmd: &InjectKeyCommand, encoding: KeyLengthEncoding) -> Vec<u8> {
    let key_length = match encoding {
        KeyLengthEncoding::HexBytes => format!("{:03X}", cmd.key_hex.len() / 2),
        KeyLengthEncoding::DecimalChars => format!("{:03}", cmd.key_hex.len()),
    };
    let slot = format!("{:02}", cmd.key_slot);
    let ktk_slot = format!("{:02}", cmd.ktk_slot);

    let mut fields: Vec<String> = vec![
        cmd.version.clone(),
        slot,
        ktk_slot,
        cmd.key_type.clone(),
        cmd.encryption_type.clone(),
        cmd.algorithm.clone(),
        cmd.key_sub_type.clone(),
        wire_checksum(&cmd.key_checksum),
        wire_checksum(&cmd.ktk_checksum),
        cmd.ksn.clone(),
        key_length,
        cmd.key_hex.clone(),
    ];
    if let (KeyLengthEncoding::DecimalChars, Some(ktk)) = (encoding, &cmd.ktk_hex) {
        fields.push(format!("{:03}", ktk.len()));
        fields.push(ktk.clone());
    }
    if let Some((total, index)) = cmd.batch {
        fields.push(format!("{total:03}{index:03}"));
    }

    let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    format(code::INJECT_SYMMETRIC_KEY, &refs)
}

pub fn read_serial_command(version: &str) -> Vec<u8> {
    format(code::READ_SERIAL, &[version])
}

pub fn write_serial_command(version: &str, serial: &str) -> Vec<u8> {
    format(code::WRITE_SERIAL, &[version, serial])
}

pub fn delete_all_command(version: &str) -> Vec<u8> {
    format(code::DELETE_ALL_KEYS, &[version])
}

pub fn delete_single_command(version: &str, slot: u32, key_type: &str) -> Vec<u8> {
    format(
        code::DELETE_SINGLE_KEY,
        &[version, &format!("{slot:02}"), key_type],
    )
}

pub fn validate_brand_command(expected_device_type: &str) -> Vec<u8> {
    format(
        code::VALIDATE_BRAND,
        &[BRAND_COMMAND_VERSION, expected_device_type],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lrc, ETX, STX};

    #[test]
    fn frame_layout() {
        let frame = delete_all_response(ErrorCode::Successful);
        assert_eq!(frame[0], STX);
        assert_eq!(&frame[1..5], b"0500");
        assert_eq!(frame[5], ETX);
        assert_eq!(frame[6], lrc(b"0500\x03"));
    }

    #[test]
    fn inject_response_truncates_checksum() {
        let frame = inject_key_response(ErrorCode::Successful, "a1b2c3");
        assert_eq!(&frame[1..frame.len() - 2], b"0200A1B2");
    }

    #[test]
    fn brand_mismatch_carries_actual_type() {
        let frame = brand_response(false, "01");
        assert_eq!(&frame[1..frame.len() - 2], b"082A01");
        let frame = brand_response(true, "01");
        assert_eq!(&frame[1..frame.len() - 2], b"0800");
    }

    #[test]
    fn inject_command_length_field_follows_encoding() {
        let cmd = InjectKeyCommand {
            version: "01".into(),
            key_slot: 3,
            ktk_slot: 0,
            key_type: "01".into(),
            encryption_type: "00".into(),
            algorithm: "01".into(),
            key_sub_type: "00".into(),
            key_checksum: "ABCDEF".into(),
            ktk_checksum: "0000".into(),
            ksn: "0".repeat(20),
            key_length: String::new(),
            key_hex: "00".repeat(24),
            ktk_hex: None,
            batch: None,
        };
        let hex = inject_key_command(&cmd, KeyLengthEncoding::HexBytes);
        let dec = inject_key_command(&cmd, KeyLengthEncoding::DecimalChars);
        // header: code(2) + 7×2 + 4 + 4 + ksn(20) = 44 chars before the length
        assert_eq!(&hex[1 + 44..1 + 47], b"018");
        assert_eq!(&dec[1 + 44..1 + 47], b"048");
    }
}
