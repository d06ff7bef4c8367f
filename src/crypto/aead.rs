//! AES-256-GCM 参考实现
//!
//! blob = base64(nonce || ciphertext || tag)，每次加密随机 nonce。

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

use super::{CryptoError, SymmetricKey, VaultCrypto};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCrypto;

impl AesGcmCrypto {
    pub fn new() -> Self {
        Self
    }

    /// 生成随机 256 位密钥
    pub fn generate_key() -> SymmetricKey {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        SymmetricKey::from_bytes(key.to_vec())
    }

    fn cipher(key: &SymmetricKey) -> Result<Aes256Gcm, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl VaultCrypto for AesGcmCrypto {
    fn wrap_key(&self, key: &SymmetricKey, wrapping: &SymmetricKey) -> Result<String, CryptoError> {
        self.encrypt(key.as_bytes(), wrapping)
    }

    fn unwrap_key(&self, blob: &str, wrapping: &SymmetricKey) -> Result<SymmetricKey, CryptoError> {
        let mut bytes = self.decrypt(blob, wrapping)?;
        Ok(SymmetricKey::from_bytes(std::mem::take(&mut *bytes)))
    }

    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<String, CryptoError> {
        let cipher = Self::cipher(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, blob: &str, key: &SymmetricKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Malformed("ciphertext too short".to_string()));
        }
        let cipher = Self::cipher(key)?;
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }
}
