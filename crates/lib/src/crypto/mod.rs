//! Per-user encryption contracts.
//!
//! A [`UserEncryptor`] seals and opens secrets for exactly one user. Subjects only
//! accept encryptors that arrive wrapped in a [`UserBound`] (or resolved through an
//! [`EncryptorProvider`] for a user id), so a mismatched identity is caught before any
//! data is written.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, state::UserId};

mod aes;
mod errors;

pub use aes::{AesGcmEncryptor, Argon2Params, KEY_LENGTH, NONCE_LENGTH};
pub use errors::CryptoError;

/// Opaque output of [`UserEncryptor::encrypt`].
///
/// The representation is owned by the encryptor; the rest of the crate only moves
/// it in and out of the persisted envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedPayload(Value);

impl EncryptedPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Encrypts and decrypts secrets on behalf of one user.
#[async_trait]
pub trait UserEncryptor: Send + Sync {
    /// The user whose key material this encryptor holds.
    fn user_id(&self) -> &UserId;

    /// Seal a serialized secret.
    async fn encrypt(&self, secret: Value) -> Result<EncryptedPayload>;

    /// Open a payload produced by [`encrypt`](Self::encrypt).
    async fn decrypt(&self, payload: &EncryptedPayload) -> Result<Value>;
}

/// A value tagged with the user it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserBound<T> {
    pub user_id: UserId,
    pub value: T,
}

impl<T> UserBound<T> {
    pub fn new(user_id: impl Into<UserId>, value: T) -> Self {
        Self {
            user_id: user_id.into(),
            value,
        }
    }
}

/// Resolves the encryptor for a user id.
#[async_trait]
pub trait EncryptorProvider: Send + Sync {
    async fn encryptor_for(&self, user_id: &UserId) -> Result<Arc<dyn UserEncryptor>>;
}
