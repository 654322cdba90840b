//! Error types for user encryption
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CryptoError {
    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("Key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("No encryptor available for user: {user_id}")]
    EncryptorUnavailable { user_id: String },
}

impl CryptoError {
    /// Check if this error happened while sealing a secret.
    pub fn is_encryption_error(&self) -> bool {
        matches!(self, CryptoError::EncryptionFailed { .. })
    }

    /// Check if this error happened while opening a secret.
    pub fn is_decryption_error(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed { .. } | CryptoError::InvalidNonceLength { .. }
        )
    }

    /// Check if this error is caused by key material.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            CryptoError::KeyDerivationFailed { .. } | CryptoError::InvalidKeyLength { .. }
        )
    }
}

impl From<CryptoError> for crate::Error {
    fn from(err: CryptoError) -> Self {
        crate::Error::Crypto(err)
    }
}
