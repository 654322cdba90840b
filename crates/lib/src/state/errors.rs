//! Error types for backing state operations.

use thiserror::Error;

/// Errors reported by a [`BackingState`](super::BackingState) implementation.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// The backing store rejected an update
    #[error("Update failed for key '{key}': {reason}")]
    UpdateFailed { key: String, reason: String },
}

impl StateError {
    /// Check if this error was raised while writing
    pub fn is_update_error(&self) -> bool {
        matches!(self, StateError::UpdateFailed { .. })
    }

    /// Get the storage key associated with this error
    pub fn key(&self) -> &str {
        match self {
            StateError::UpdateFailed { key, .. } => key,
        }
    }
}

impl From<StateError> for crate::Error {
    fn from(err: StateError) -> Self {
        crate::Error::State(err)
    }
}
