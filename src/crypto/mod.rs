//! 加密协作方：密钥包装/解包与载荷加解密
//!
//! 编排器只调用 VaultCrypto，不定义底层原语；参考实现见 [`aead::AesGcmCrypto`]。

pub mod aead;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use zeroize::Zeroizing;

pub use aead::AesGcmCrypto;

/// 加密协作方错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// 对称密钥（用户密钥 / 组织密钥）
///
/// 仅驻留内存，drop 时清零；Debug 输出已脱敏。
#[derive(Clone)]
pub struct SymmetricKey(Arc<Zeroizing<Vec<u8>>>);

impl SymmetricKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Arc::new(Zeroizing::new(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SymmetricKey").field(&"[REDACTED]").finish()
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SymmetricKey {}

/// 加密协作方 trait：密钥信封与载荷 AEAD
pub trait VaultCrypto: Send + Sync {
    /// 用 wrapping 密钥包装 key，返回密文 blob
    fn wrap_key(&self, key: &SymmetricKey, wrapping: &SymmetricKey) -> Result<String, CryptoError>;

    /// 用 wrapping 密钥解包 blob
    fn unwrap_key(&self, blob: &str, wrapping: &SymmetricKey) -> Result<SymmetricKey, CryptoError>;

    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<String, CryptoError>;

    fn decrypt(&self, blob: &str, key: &SymmetricKey) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}
