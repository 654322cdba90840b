//! AES-256-GCM user encryptor.
//!
//! Provides a [`UserEncryptor`] using:
//! - Argon2id for deriving the key from a password
//! - AES-256-GCM with a fresh random nonce for every secret
//!
//! Secrets are serialized to JSON before encryption. The payload is a JSON object:
//!
//! ```text
//! { "ciphertext": base64(AES-GCM(json(secret))), "nonce": base64(12 bytes) }
//! ```

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng},
};
use argon2::{
    Argon2, Params,
    password_hash::SaltString,
};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CryptoError, EncryptedPayload, UserEncryptor};
use crate::{Result, state::UserId};

/// Nonce length for AES-GCM (12 bytes standard)
pub const NONCE_LENGTH: usize = 12;

/// Key length for AES-256 (32 bytes)
pub const KEY_LENGTH: usize = 32;

/// Argon2id cost parameters used for password-derived keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Params {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Time cost (iterations)
    pub t_cost: u32,
    /// Parallelism
    pub p_cost: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

/// Wire shape of an AES payload.
#[derive(Serialize, Deserialize)]
struct SealedFragment {
    ciphertext: String,
    nonce: String,
}

/// Key material, zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
struct SecretKey([u8; KEY_LENGTH]);

/// AES-256-GCM encryptor bound to a single user.
pub struct AesGcmEncryptor {
    user_id: UserId,
    key: SecretKey,
}

impl std::fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryptor")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl AesGcmEncryptor {
    /// Create an encryptor from a raw 32-byte key.
    pub fn new(user_id: impl Into<UserId>, key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref();
        let key: [u8; KEY_LENGTH] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: key.len(),
        })?;
        Ok(Self {
            user_id: user_id.into(),
            key: SecretKey(key),
        })
    }

    /// Derive the key from a password and salt using Argon2id.
    ///
    /// `salt` is a base64 salt string such as one returned by [`generate_salt`](Self::generate_salt).
    pub fn from_password(
        user_id: impl Into<UserId>,
        password: impl AsRef<str>,
        salt: impl AsRef<str>,
        params: Argon2Params,
    ) -> Result<Self> {
        let salt = SaltString::from_b64(salt.as_ref()).map_err(|e| {
            CryptoError::KeyDerivationFailed {
                reason: format!("Invalid salt: {e}"),
            }
        })?;

        let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LENGTH))
            .map_err(|e| CryptoError::KeyDerivationFailed {
                reason: format!("Invalid Argon2 parameters: {e}"),
            })?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = SecretKey([0u8; KEY_LENGTH]);
        argon2
            .hash_password_into(
                password.as_ref().as_bytes(),
                salt.as_str().as_bytes(),
                &mut key.0,
            )
            .map_err(|e| CryptoError::KeyDerivationFailed {
                reason: format!("Key derivation failed: {e}"),
            })?;

        Ok(Self {
            user_id: user_id.into(),
            key,
        })
    }

    /// Generate a random salt suitable for [`from_password`](Self::from_password).
    pub fn generate_salt() -> String {
        SaltString::generate(&mut OsRng)
            .as_str()
            .to_string()
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key.0).map_err(|e| {
            CryptoError::EncryptionFailed {
                reason: format!("Failed to create cipher: {e}"),
            }
            .into()
        })
    }
}

#[async_trait]
impl UserEncryptor for AesGcmEncryptor {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn encrypt(&self, secret: Value) -> Result<EncryptedPayload> {
        let mut plaintext = serde_json::to_vec(&secret)?;
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher.encrypt(&nonce, plaintext.as_slice());
        plaintext.zeroize();
        let ciphertext = ciphertext.map_err(|e| CryptoError::EncryptionFailed {
            reason: format!("Encryption failed: {e}"),
        })?;

        let fragment = SealedFragment {
            ciphertext: Base64::encode_string(&ciphertext),
            nonce: Base64::encode_string(&nonce),
        };
        Ok(EncryptedPayload::new(serde_json::to_value(fragment)?))
    }

    async fn decrypt(&self, payload: &EncryptedPayload) -> Result<Value> {
        let fragment: SealedFragment =
            serde_json::from_value(payload.as_value().clone()).map_err(|e| {
                CryptoError::DecryptionFailed {
                    reason: format!("Invalid payload: {e}"),
                }
            })?;

        let bytes = |field: &str, b64: &str| -> Result<Vec<u8>> {
            Base64::decode_vec(b64).map_err(|_| {
                CryptoError::DecryptionFailed {
                    reason: format!("{field}: invalid base64"),
                }
                .into()
            })
        };
        let ciphertext = bytes("ciphertext", &fragment.ciphertext)?;
        let nonce_bytes = bytes("nonce", &fragment.nonce)?;

        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_LENGTH,
                actual: nonce_bytes.len(),
            }
            .into());
        }

        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut plaintext =
            cipher
                .decrypt(nonce, ciphertext.as_slice())
                .map_err(|e| CryptoError::DecryptionFailed {
                    reason: format!("Decryption failed: {e}"),
                })?;

        let secret = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        Ok(secret?)
    }
}
