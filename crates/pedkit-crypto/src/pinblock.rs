//! ISO 9564-1 clear PIN blocks (formats 0, 1 and 3).

use rand::Rng;

use crate::error::{CryptoError, CryptoResult};

pub const PIN_BLOCK_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinBlockFormat {
    /// PIN ⊕ PAN, `F` fill
    #[default]
    Iso0,
    /// PIN with random fill, no PAN
    Iso1,
    /// PIN ⊕ PAN, random `A`-`F` fill
    Iso3,
}

impl PinBlockFormat {
    pub fn needs_pan(self) -> bool {
        !matches!(self, PinBlockFormat::Iso1)
    }

    fn control_nibble(self) -> u8 {
        match self {
            PinBlockFormat::Iso0 => 0,
            PinBlockFormat::Iso1 => 1,
            PinBlockFormat::Iso3 => 3,
        }
    }
}

fn nibbles_to_bytes(nibbles: &[u8; 16]) -> [u8; PIN_BLOCK_LEN] {
    let mut out = [0u8; PIN_BLOCK_LEN];
    for (i, pair) in nibbles.chunks_exact(2).enumerate() {
        out[i] = (pair[0] << 4) | pair[1];
    }
    out
}

fn validate_pin(pin: &str) -> CryptoResult<()> {
    if !(4..=12).contains(&pin.len()) {
        return Err(CryptoError::InvalidPin(format!(
            "length {} outside 4-12",
            pin.len()
        )));
    }
    if !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CryptoError::InvalidPin("non-digit character".into()));
    }
    Ok(())
}

/// `0000` ‖ the 12 rightmost PAN digits excluding the check digit.
fn pan_field(pan: &str) -> CryptoResult<[u8; PIN_BLOCK_LEN]> {
    if pan.len() < 13 || !pan.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CryptoError::InvalidPan(format!(
            "need at least 13 digits, got {:?}",
            pan.len()
        )));
    }
    let body = &pan[pan.len() - 13..pan.len() - 1];
    let mut nibbles = [0u8; 16];
    for (i, b) in body.bytes().enumerate() {
        nibbles[4 + i] = b - b'0';
    }
    Ok(nibbles_to_bytes(&nibbles))
}

/// Build a clear PIN block. `pan` is required for formats 0 and 3.
pub fn build(
    format: PinBlockFormat,
    pin: &str,
    pan: Option<&str>,
) -> CryptoResult<[u8; PIN_BLOCK_LEN]> {
    validate_pin(pin)?;

    let mut rng = rand::thread_rng();
    let mut nibbles = [0u8; 16];
    nibbles[0] = format.control_nibble();
    // validated: at most 12 digits
    nibbles[1] = pin.len() as u8;
    for (i, nibble) in nibbles.iter_mut().enumerate().skip(2) {
        *nibble = match pin.as_bytes().get(i - 2) {
            Some(d) => d - b'0',
            None => match format {
                PinBlockFormat::Iso0 => 0xF,
                PinBlockFormat::Iso1 => rng.gen_range(0..=0xF),
                PinBlockFormat::Iso3 => rng.gen_range(0xA..=0xF),
            },
        };
    }
    let mut block = nibbles_to_bytes(&nibbles);

    if format.needs_pan() {
        let pan = pan.ok_or_else(|| CryptoError::InvalidPan("missing".into()))?;
        for (b, p) in block.iter_mut().zip(pan_field(pan)?) {
            *b ^= p;
        }
    }
    Ok(block)
}

/// Recover the PIN from a clear PIN block.
pub fn extract_pin(block: &[u8; PIN_BLOCK_LEN], pan: Option<&str>) -> CryptoResult<String> {
    let mut clear = *block;
    let control = clear[0] >> 4;
    let format = match control {
        0 => PinBlockFormat::Iso0,
        1 => PinBlockFormat::Iso1,
        3 => PinBlockFormat::Iso3,
        other => {
            return Err(CryptoError::InvalidPin(format!(
                "unsupported block format {other}"
            )))
        }
    };
    if format.needs_pan() {
        let pan = pan.ok_or_else(|| CryptoError::InvalidPan("missing".into()))?;
        for (b, p) in clear.iter_mut().zip(pan_field(pan)?) {
            *b ^= p;
        }
    }

    let len = (clear[0] & 0x0F) as usize;
    if !(4..=12).contains(&len) {
        return Err(CryptoError::InvalidPin(format!("encoded length {len}")));
    }
    let digits: String = (0..len)
        .map(|i| {
            let byte = clear[1 + i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
            char::from(b'0' + nibble.min(9))
        })
        .collect();
    validate_pin(&digits)?;
    Ok(digits)
}
