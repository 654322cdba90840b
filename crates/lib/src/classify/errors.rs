//! Error types for classification.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum ClassifyError {
    /// A stored value does not have the classified envelope shape
    #[error("Malformed classified envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// The classifier could not reassemble disclosed and secret data
    #[error("Declassification failed: {reason}")]
    DeclassifyFailed { reason: String },
}

impl ClassifyError {
    /// Check if this error indicates malformed persisted data
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ClassifyError::MalformedEnvelope { .. } | ClassifyError::DeclassifyFailed { .. }
        )
    }
}

impl From<ClassifyError> for crate::Error {
    fn from(err: ClassifyError) -> Self {
        crate::Error::Classify(err)
    }
}
