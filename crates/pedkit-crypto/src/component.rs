//! XOR combination of key components.

use crate::error::{CryptoError, CryptoResult};

/// XOR `component` into `acc` in place.
pub fn xor_into(acc: &mut [u8], component: &[u8]) -> CryptoResult<()> {
    if acc.len() != component.len() {
        return Err(CryptoError::LengthMismatch {
            left: acc.len(),
            right: component.len(),
        });
    }
    for (a, c) in acc.iter_mut().zip(component) {
        *a ^= c;
    }
    Ok(())
}

/// XOR of two equal-length byte strings.
pub fn xor(a: &[u8], b: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut out = a.to_vec();
    xor_into(&mut out, b)?;
    Ok(out)
}
