//! DES, 3DES and AES block ciphers behind one runtime-selected type.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use pedkit_core::KeyAlgorithm;

use crate::error::{CryptoError, CryptoResult};

/// Block chaining mode for multi-block operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    #[default]
    Ecb,
    Cbc,
}

pub enum BlockCipher {
    Des(des::Des),
    Tdes2(des::TdesEde2),
    Tdes3(des::TdesEde3),
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
}

impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BlockCipher")
            .field(&self.algorithm())
            .finish()
    }
}

fn init<C: KeyInit>(algorithm: KeyAlgorithm, key: &[u8]) -> CryptoResult<C> {
    C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        algorithm,
        expected: algorithm.key_len(),
        actual: key.len(),
    })
}

impl BlockCipher {
    /// Key a cipher for `algorithm`. The key length must match exactly.
    pub fn new(algorithm: KeyAlgorithm, key: &[u8]) -> CryptoResult<Self> {
        if key.len() != algorithm.key_len() {
            return Err(CryptoError::InvalidKeyLength {
                algorithm,
                expected: algorithm.key_len(),
                actual: key.len(),
            });
        }
        Ok(match algorithm {
            KeyAlgorithm::Des => Self::Des(init(algorithm, key)?),
            KeyAlgorithm::Tdes2Key => Self::Tdes2(init(algorithm, key)?),
            KeyAlgorithm::Tdes3Key => Self::Tdes3(init(algorithm, key)?),
            KeyAlgorithm::Aes128 => Self::Aes128(init(algorithm, key)?),
            KeyAlgorithm::Aes192 => Self::Aes192(init(algorithm, key)?),
            KeyAlgorithm::Aes256 => Self::Aes256(init(algorithm, key)?),
            KeyAlgorithm::Sm4 => return Err(CryptoError::UnsupportedAlgorithm(algorithm)),
        })
    }

    /// Key a cipher, inferring the algorithm from the key length.
    pub fn from_key(key: &[u8]) -> CryptoResult<Self> {
        let algorithm = KeyAlgorithm::infer_from_len(key.len())
            .ok_or(CryptoError::UnknownKeyLength(key.len()))?;
        Self::new(algorithm, key)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::Des(_) => KeyAlgorithm::Des,
            Self::Tdes2(_) => KeyAlgorithm::Tdes2Key,
            Self::Tdes3(_) => KeyAlgorithm::Tdes3Key,
            Self::Aes128(_) => KeyAlgorithm::Aes128,
            Self::Aes192(_) => KeyAlgorithm::Aes192,
            Self::Aes256(_) => KeyAlgorithm::Aes256,
        }
    }

    pub fn block_size(&self) -> usize {
        self.algorithm().block_size()
    }

    /// `block` must be exactly one block for this cipher.
    fn encrypt_block(&self, block: &mut [u8]) {
        match self {
            Self::Des(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Tdes2(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Tdes3(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes128(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes192(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
        }
    }

    /// `block` must be exactly one block for this cipher.
    fn decrypt_block(&self, block: &mut [u8]) {
        match self {
            Self::Des(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Tdes2(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Tdes3(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes128(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes192(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
        }
    }

    fn check_len(&self, data: &[u8]) -> CryptoResult<usize> {
        let block = self.block_size();
        if data.is_empty() || data.len() % block != 0 {
            return Err(CryptoError::InvalidDataLength {
                len: data.len(),
                block,
            });
        }
        Ok(block)
    }

    fn check_iv(&self, iv: Option<&[u8]>) -> CryptoResult<Vec<u8>> {
        let block = self.block_size();
        match iv {
            None => Ok(vec![0u8; block]),
            Some(iv) if iv.len() == block => Ok(iv.to_vec()),
            Some(iv) => Err(CryptoError::InvalidIv {
                expected: block,
                actual: iv.len(),
            }),
        }
    }

    pub fn encrypt_ecb(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let block = self.check_len(data)?;
        let mut out = data.to_vec();
        for chunk in out.chunks_exact_mut(block) {
            self.encrypt_block(chunk);
        }
        Ok(out)
    }

    pub fn decrypt_ecb(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let block = self.check_len(data)?;
        let mut out = data.to_vec();
        for chunk in out.chunks_exact_mut(block) {
            self.decrypt_block(chunk);
        }
        Ok(out)
    }

    /// CBC encryption; a missing IV means all zeros.
    pub fn encrypt_cbc(&self, iv: Option<&[u8]>, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let block = self.check_len(data)?;
        let mut chain = self.check_iv(iv)?;
        let mut out = data.to_vec();
        for chunk in out.chunks_exact_mut(block) {
            for (b, c) in chunk.iter_mut().zip(&chain) {
                *b ^= c;
            }
            self.encrypt_block(chunk);
            chain.copy_from_slice(chunk);
        }
        Ok(out)
    }

    pub fn decrypt_cbc(&self, iv: Option<&[u8]>, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let block = self.check_len(data)?;
        let mut chain = self.check_iv(iv)?;
        let mut out = data.to_vec();
        for chunk in out.chunks_exact_mut(block) {
            let saved = chunk.to_vec();
            self.decrypt_block(chunk);
            for (b, c) in chunk.iter_mut().zip(&chain) {
                *b ^= c;
            }
            chain = saved;
        }
        Ok(out)
    }

    pub fn encrypt(
        &self,
        mode: CipherMode,
        iv: Option<&[u8]>,
        data: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        match mode {
            CipherMode::Ecb => self.encrypt_ecb(data),
            CipherMode::Cbc => self.encrypt_cbc(iv, data),
        }
    }

    pub fn decrypt(
        &self,
        mode: CipherMode,
        iv: Option<&[u8]>,
        data: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        match mode {
            CipherMode::Ecb => self.decrypt_ecb(data),
            CipherMode::Cbc => self.decrypt_cbc(iv, data),
        }
    }
}
