//! Error types for the state subject.

use thiserror::Error;

use crate::state::UserId;

#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum SubjectError {
    /// A dependency reported a user other than the one the subject is bound to
    #[error("User id mismatch: expected {expected_user_id}, found {actual_user_id}")]
    UserIdMismatch {
        expected_user_id: UserId,
        actual_user_id: UserId,
    },
}

impl SubjectError {
    /// Check if this error indicates an identity desync
    pub fn is_identity_error(&self) -> bool {
        matches!(self, SubjectError::UserIdMismatch { .. })
    }
}

impl From<SubjectError> for crate::Error {
    fn from(err: SubjectError) -> Self {
        crate::Error::Subject(err)
    }
}
