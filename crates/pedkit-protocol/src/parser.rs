//! Payload → [`Message`] decoding.
//!
//! Every field read goes through a bounds-checked cursor; running off the end
//! of a payload yields [`Message::ParseError`] with the raw bytes attached,
//! never a panic.

use pedkit_core::config::KeyLengthEncoding;
use thiserror::Error;

use crate::error_code::ErrorCode;
use crate::message::{
    code, InjectKeyCommand, InjectKeyResponse, Message, ENC_TYPE_INLINE_KTK, LEGACY_VERSION,
};

/// A `02`/`07` payload up to this many chars with a known response code is a response.
pub const RESPONSE_MAX_LEN: usize = 60;

/// Same rule for the brand validation reply, which is much shorter.
pub const BRAND_RESPONSE_MAX_LEN: usize = 20;

const ZERO_KSN: &str = "00000000000000000000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload is not ASCII")]
    NotAscii,

    #[error("payload too short for a command code ({0} chars)")]
    MissingCode(usize),

    #[error("unexpected end of payload: wanted {wanted} chars at offset {offset}, {len} available")]
    Truncated {
        wanted: usize,
        offset: usize,
        len: usize,
    },

    #[error("invalid {field} field: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Left-to-right cursor over an ASCII payload.
struct PayloadReader<'a> {
    text: &'a str,
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, cursor: 0 }
    }

    fn read(&mut self, n: usize) -> Result<&'a str, ParseError> {
        let end = self.cursor + n;
        if end > self.text.len() {
            return Err(ParseError::Truncated {
                wanted: n,
                offset: self.cursor,
                len: self.text.len(),
            });
        }
        let field = &self.text[self.cursor..end];
        self.cursor = end;
        Ok(field)
    }

    fn read_decimal(&mut self, n: usize, field: &'static str) -> Result<u32, ParseError> {
        let raw = self.read(n)?;
        parse_radix(raw, 10, field)
    }

    fn read_rest(&mut self) -> &'a str {
        let rest = &self.text[self.cursor..];
        self.cursor = self.text.len();
        rest
    }

    fn remaining(&self) -> usize {
        self.text.len() - self.cursor
    }
}

fn parse_radix(raw: &str, radix: u32, field: &'static str) -> Result<u32, ParseError> {
    u32::from_str_radix(raw, radix).map_err(|_| ParseError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn optional(reader: &mut PayloadReader<'_>, n: usize) -> Option<String> {
    if reader.remaining() >= n && n > 0 {
        reader.read(n).ok().map(str::to_string)
    } else {
        None
    }
}

fn optional_rest(reader: &mut PayloadReader<'_>) -> Option<String> {
    let rest = reader.read_rest();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// True when the payload looks like a short reply carrying a known code.
fn is_response(payload: &str, max_len: usize) -> bool {
    payload.len() <= max_len
        && payload
            .get(2..4)
            .is_some_and(|c| ErrorCode::from_code(c).is_some())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageParser {
    key_length: KeyLengthEncoding,
}

impl MessageParser {
    pub fn new(key_length: KeyLengthEncoding) -> Self {
        Self { key_length }
    }

    pub fn key_length_encoding(&self) -> KeyLengthEncoding {
        self.key_length
    }

    /// Decode one frame payload. Never fails: malformed input comes back as
    /// [`Message::ParseError`].
    pub fn parse(&self, payload: &[u8]) -> Message {
        match self.try_parse(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, payload_len = payload.len(), "unparseable payload");
                Message::ParseError {
                    raw: payload.to_vec(),
                    message: e.to_string(),
                }
            }
        }
    }

    fn try_parse(&self, payload: &[u8]) -> Result<Message, ParseError> {
        if !payload.is_ascii() {
            return Err(ParseError::NotAscii);
        }
        // ASCII is valid UTF-8
        let text = std::str::from_utf8(payload).map_err(|_| ParseError::NotAscii)?;
        if text.len() < 2 {
            return Err(ParseError::MissingCode(text.len()));
        }

        let mut reader = PayloadReader::new(text);
        let command = reader.read(2)?;
        tracing::trace!(command, len = text.len(), "parsing payload");

        match command {
            code::INJECT_SYMMETRIC_KEY if is_response(text, RESPONSE_MAX_LEN) => {
                parse_inject_response(&mut reader)
            }
            code::INJECT_SYMMETRIC_KEY => self.parse_inject_command(&mut reader),
            code::LEGACY_INJECT_DUKPT | code::LEGACY_INJECT_MASTER => {
                parse_legacy_inject(&mut reader, command == code::LEGACY_INJECT_DUKPT)
            }
            code::READ_SERIAL => Ok(Message::ReadSerial {
                version: reader.read(2)?.to_string(),
            }),
            code::WRITE_SERIAL => Ok(Message::WriteSerial {
                version: reader.read(2)?.to_string(),
                serial: reader.read(16)?.to_string(),
            }),
            code::DELETE_ALL_KEYS => Ok(Message::DeleteAllKeys {
                version: reader.read(2)?.to_string(),
            }),
            code::DELETE_SINGLE_KEY => Ok(Message::DeleteSingleKey {
                version: reader.read(2)?.to_string(),
                slot: reader.read_decimal(2, "slot")?,
                key_type: reader.read(2)?.to_string(),
            }),
            code::UNINSTALL_APP if is_response(text, RESPONSE_MAX_LEN) => {
                Ok(Message::UninstallAppResponse {
                    code: reader.read(2)?.to_string(),
                    device_serial: optional(&mut reader, 16),
                    device_model: optional_rest(&mut reader),
                })
            }
            code::UNINSTALL_APP => Ok(Message::UninstallApp {
                version: reader.read(2)?.to_string(),
                token: reader.read_rest().to_string(),
            }),
            code::VALIDATE_BRAND if is_response(text, BRAND_RESPONSE_MAX_LEN) => {
                Ok(Message::ValidateBrandResponse {
                    code: reader.read(2)?.to_string(),
                    actual_device_type: optional(&mut reader, 2),
                })
            }
            code::VALIDATE_BRAND => Ok(Message::ValidateBrand {
                version: reader.read(2)?.to_string(),
                expected_device_type: reader.read(2)?.to_string(),
            }),
            other => Ok(Message::Unknown {
                code: other.to_string(),
                payload: text.to_string(),
            }),
        }
    }

    fn parse_inject_command(&self, reader: &mut PayloadReader<'_>) -> Result<Message, ParseError> {
        let version = reader.read(2)?.to_string();
        let key_slot = reader.read_decimal(2, "key slot")?;
        let ktk_slot = reader.read_decimal(2, "ktk slot")?;
        let key_type = reader.read(2)?.to_string();
        let encryption_type = reader.read(2)?.to_string();
        let algorithm = reader.read(2)?.to_string();
        let key_sub_type = reader.read(2)?.to_string();
        let key_checksum = reader.read(4)?.to_string();
        let ktk_checksum = reader.read(4)?.to_string();
        let ksn = reader.read(20)?.to_string();
        let key_length = reader.read(3)?.to_string();

        let (key_hex, ktk_hex) = match self.key_length {
            KeyLengthEncoding::HexBytes => {
                let bytes = parse_radix(&key_length, 16, "key length")? as usize;
                (reader.read(bytes * 2)?.to_string(), None)
            }
            KeyLengthEncoding::DecimalChars => {
                let chars = parse_radix(&key_length, 10, "key length")? as usize;
                let key_hex = reader.read(chars)?.to_string();
                let ktk_hex = if encryption_type == ENC_TYPE_INLINE_KTK {
                    let ktk_chars = reader.read_decimal(3, "ktk length")? as usize;
                    Some(reader.read(ktk_chars)?.to_string())
                } else {
                    None
                };
                (key_hex, ktk_hex)
            }
        };

        let batch = if reader.remaining() >= 6 {
            let total = reader.read_decimal(3, "total keys");
            let index = reader.read_decimal(3, "key index");
            match (total, index) {
                (Ok(t), Ok(i)) => Some((t, i)),
                _ => {
                    tracing::debug!("ignoring malformed batch trailer");
                    Some((0, 0))
                }
            }
        } else {
            None
        };

        Ok(Message::InjectKey(InjectKeyCommand {
            version,
            key_slot,
            ktk_slot,
            key_type,
            encryption_type,
            algorithm,
            key_sub_type,
            key_checksum,
            ktk_checksum,
            ksn,
            key_length,
            key_hex,
            ktk_hex,
            batch,
        }))
    }
}

fn parse_inject_response(reader: &mut PayloadReader<'_>) -> Result<Message, ParseError> {
    Ok(Message::InjectKeyResponse(InjectKeyResponse {
        code: reader.read(2)?.to_string(),
        key_checksum: reader.read(4)?.to_string(),
        device_serial: optional(reader, 16),
        device_model: optional_rest(reader),
    }))
}

fn parse_legacy_inject(reader: &mut PayloadReader<'_>, dukpt: bool) -> Result<Message, ParseError> {
    let key_slot = reader.read_decimal(2, "key slot")?;
    let ksn = if dukpt {
        reader.read(20)?.to_string()
    } else {
        ZERO_KSN.to_string()
    };
    let key_hex = reader.read_rest().to_string();

    Ok(Message::InjectKey(InjectKeyCommand {
        version: LEGACY_VERSION.to_string(),
        key_slot,
        ktk_slot: 0,
        key_type: if dukpt { "02" } else { "01" }.to_string(),
        encryption_type: "00".to_string(),
        algorithm: "00".to_string(),
        key_sub_type: "00".to_string(),
        key_checksum: "0000".to_string(),
        ktk_checksum: "0000".to_string(),
        ksn,
        key_length: format!("{:03X}", key_hex.len() / 2),
        key_hex,
        ktk_hex: None,
        batch: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inject_payload(key_len_field: &str, key: &str, trailer: &str) -> String {
        format!(
            "02010300010001000000ABCD{}{}{}{}",
            "00000000000000000000", key_len_field, key, trailer
        )
    }

    const KEY16: &str = "0123456789ABCDEFFEDCBA9876543210";

    #[test]
    fn parses_hex_length_inject_command() {
        let payload = inject_payload("010", KEY16, "");
        let msg = MessageParser::default().parse(payload.as_bytes());

        let Message::InjectKey(cmd) = msg else {
            panic!("expected inject command, got {msg:?}");
        };
        assert_eq!(cmd.version, "01");
        assert_eq!(cmd.key_slot, 3);
        assert_eq!(cmd.ktk_slot, 0);
        assert_eq!(cmd.key_type, "01");
        assert_eq!(cmd.encryption_type, "00");
        assert_eq!(cmd.algorithm, "01");
        assert_eq!(cmd.key_sub_type, "00");
        assert_eq!(cmd.key_checksum, "0000");
        assert_eq!(cmd.ktk_checksum, "ABCD");
        assert_eq!(cmd.key_hex, KEY16);
        assert_eq!(cmd.batch, None);
    }

    #[test]
    fn parses_batch_trailer() {
        let payload = inject_payload("010", KEY16, "003002");
        let Message::InjectKey(cmd) = MessageParser::default().parse(payload.as_bytes()) else {
            panic!("expected inject command");
        };
        assert_eq!(cmd.batch, Some((3, 2)));
    }

    #[test]
    fn malformed_batch_trailer_falls_back_to_zero() {
        let payload = inject_payload("010", KEY16, "XYZ002");
        let Message::InjectKey(cmd) = MessageParser::default().parse(payload.as_bytes()) else {
            panic!("expected inject command");
        };
        assert_eq!(cmd.batch, Some((0, 0)));
    }

    #[test]
    fn decimal_length_reads_inline_ktk() {
        let payload = format!(
            "0201050102020100ABCD1234{}032{}016{}",
            "00000000000000000000", KEY16, "1111222233334444"
        );
        let parser = MessageParser::new(KeyLengthEncoding::DecimalChars);
        let Message::InjectKey(cmd) = parser.parse(payload.as_bytes()) else {
            panic!("expected inject command");
        };
        assert_eq!(cmd.key_slot, 5);
        assert_eq!(cmd.ktk_slot, 1);
        assert_eq!(cmd.encryption_type, "02");
        assert_eq!(cmd.key_hex, KEY16);
        assert_eq!(cmd.ktk_hex.as_deref(), Some("1111222233334444"));
    }

    #[test]
    fn truncated_key_data_is_parse_error() {
        let payload = inject_payload("010", &KEY16[..10], "");
        match MessageParser::default().parse(payload.as_bytes()) {
            Message::ParseError { raw, message } => {
                assert_eq!(raw, payload.as_bytes());
                assert!(message.contains("unexpected end"), "{message}");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn short_inject_with_known_code_is_response() {
        let msg = MessageParser::default().parse(b"0200A1B2SERIAL0123456789MODELX");
        assert_eq!(
            msg,
            Message::InjectKeyResponse(InjectKeyResponse {
                code: "00".into(),
                key_checksum: "A1B2".into(),
                device_serial: Some("SERIAL0123456789".into()),
                device_model: Some("MODELX".into()),
            })
        );
        assert!(msg.is_response());
    }

    #[test]
    fn short_inject_with_unknown_code_is_command() {
        // "ZZ" is not a response code, so the payload parses as a (truncated) command
        let msg = MessageParser::default().parse(b"02ZZ1234");
        assert!(matches!(msg, Message::ParseError { .. }));
    }

    #[test]
    fn length_threshold_is_inclusive() {
        let at_limit = format!("0200ABCD{}", "X".repeat(RESPONSE_MAX_LEN - 8));
        assert!(MessageParser::default()
            .parse(at_limit.as_bytes())
            .is_response());

        let over = format!("0200ABCD{}", "X".repeat(RESPONSE_MAX_LEN - 7));
        assert!(!MessageParser::default().parse(over.as_bytes()).is_response());
    }

    #[test]
    fn legacy_master_inject() {
        let msg = MessageParser::default().parse(format!("0107{KEY16}").as_bytes());
        let Message::InjectKey(cmd) = msg else {
            panic!("expected legacy inject");
        };
        assert_eq!(cmd.version, LEGACY_VERSION);
        assert_eq!(cmd.key_slot, 7);
        assert_eq!(cmd.key_type, "01");
        assert_eq!(cmd.ksn, ZERO_KSN);
        assert_eq!(cmd.key_length, "010");
        assert_eq!(cmd.key_hex, KEY16);
    }

    #[test]
    fn legacy_dukpt_inject_reads_ksn() {
        let ksn = "FFFF9876543210E00000";
        let msg = MessageParser::default().parse(format!("0002{ksn}{KEY16}").as_bytes());
        assert_eq!(msg.command_code(), Some("00"));
        let Message::InjectKey(cmd) = msg else {
            panic!("expected legacy inject");
        };
        assert_eq!(cmd.key_type, "02");
        assert_eq!(cmd.ksn, ksn);
    }

    #[test]
    fn simple_commands() {
        let p = MessageParser::default();
        assert_eq!(
            p.parse(b"0301"),
            Message::ReadSerial {
                version: "01".into()
            }
        );
        assert_eq!(
            p.parse(b"0401ABCDEF0123456789"),
            Message::WriteSerial {
                version: "01".into(),
                serial: "ABCDEF0123456789".into()
            }
        );
        assert_eq!(
            p.parse(b"0501"),
            Message::DeleteAllKeys {
                version: "01".into()
            }
        );
        assert_eq!(
            p.parse(b"06011305"),
            Message::DeleteSingleKey {
                version: "01".into(),
                slot: 13,
                key_type: "05".into()
            }
        );
    }

    #[test]
    fn brand_command_and_response() {
        let p = MessageParser::default();
        assert_eq!(
            p.parse(b"08AA01"),
            Message::ValidateBrand {
                version: "AA".into(),
                expected_device_type: "01".into()
            }
        );
        // "2A" is outside the table, so this is a truncated command
        assert!(matches!(p.parse(b"082A"), Message::ParseError { .. }));
        assert_eq!(
            p.parse(b"080002"),
            Message::ValidateBrandResponse {
                code: "00".into(),
                actual_device_type: Some("02".into())
            }
        );
    }

    #[test]
    fn uninstall_command_with_long_token() {
        let token = "T".repeat(70);
        let msg = MessageParser::default().parse(format!("0701{token}").as_bytes());
        assert_eq!(
            msg,
            Message::UninstallApp {
                version: "01".into(),
                token
            }
        );
    }

    #[test]
    fn unknown_and_too_short() {
        let p = MessageParser::default();
        assert_eq!(
            p.parse(b"99hello"),
            Message::Unknown {
                code: "99".into(),
                payload: "99hello".into()
            }
        );
        assert!(matches!(p.parse(b"9"), Message::ParseError { .. }));
        assert!(matches!(p.parse(&[0x30, 0xFF]), Message::ParseError { .. }));
    }

    #[test]
    fn non_decimal_slot_is_parse_error() {
        assert!(matches!(
            MessageParser::default().parse(b"0601XX05"),
            Message::ParseError { .. }
        ));
    }
}
