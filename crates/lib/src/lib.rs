//!
//! Sealed State: user-scoped, encrypted, constraint-enforcing reactive state.
//! This library adapts a persistent per-user key-value slot into a multicast subject
//! that consumers can push values into and subscribe to.
//!
//! ## Core Concepts
//!
//! * **Streams (`stream::EventStream`)**: Boxed asynchronous sequences of `Result` values.
//!   The readiness combinators (`ready`, `on`, `with_latest_ready`, `any_complete`) coordinate them.
//! * **Encryptors (`crypto::UserEncryptor`)**: Per-user encryption bound to a `UserId`.
//! * **Classification (`classify::Classifier`)**: Splits state into an encrypted secret and a
//!   disclosed plaintext part, stored together as a `ClassifiedFormat` envelope.
//! * **Constraints (`constraints::StateConstraints`)**: Business rules applied with `adjust` on
//!   live writes and `fix` once at finalization, optionally recalibrated per value.
//! * **Backing state (`state::BackingState`)**: The external store holding one key for one user.
//! * **Subjects (`subject::UserStateSubject`)**: Compose all of the above and guarantee the
//!   subject never straddles two user identities.

use std::sync::Arc;

pub mod classify;
pub mod constraints;
pub mod crypto;
pub mod state;
pub mod stream;
pub mod subject;

/// Re-export the subject types for easier access.
pub use subject::{SubjectDependencies, UserStateSubject};

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the library.
///
/// Errors are multicast to every subscriber of a subject, so the type is `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialize(Arc<serde_json::Error>),

    /// Structured stream coordination errors from the stream module
    #[error(transparent)]
    Stream(stream::StreamError),

    /// Structured encryption errors from the crypto module
    #[error(transparent)]
    Crypto(crypto::CryptoError),

    /// Structured classification errors from the classify module
    #[error(transparent)]
    Classify(classify::ClassifyError),

    /// Structured backing state errors from the state module
    #[error(transparent)]
    State(state::StateError),

    /// Structured subject lifecycle errors from the subject module
    #[error(transparent)]
    Subject(subject::SubjectError),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialize(Arc::new(err))
    }
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Serialize(_) => "serialize",
            Error::Stream(_) => "stream",
            Error::Crypto(_) => "crypto",
            Error::Classify(_) => "classify",
            Error::State(_) => "state",
            Error::Subject(_) => "subject",
        }
    }

    /// Check if this error indicates that a dependency belongs to a different user.
    pub fn is_identity_error(&self) -> bool {
        match self {
            Error::Subject(subject_err) => subject_err.is_identity_error(),
            _ => false,
        }
    }

    /// Check if this error is encryption-related.
    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }

    /// Check if this error indicates malformed persisted data.
    pub fn is_malformed_data(&self) -> bool {
        match self {
            Error::Classify(classify_err) => classify_err.is_malformed(),
            Error::Serialize(_) => true,
            _ => false,
        }
    }

    /// Check if this error came from the backing store.
    pub fn is_state_error(&self) -> bool {
        matches!(self, Error::State(_))
    }

    /// Check if this error indicates a dependency stream never became ready.
    pub fn is_empty_source(&self) -> bool {
        match self {
            Error::Stream(stream_err) => stream_err.is_empty_source(),
            _ => false,
        }
    }
}
