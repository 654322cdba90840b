//! Error types for stream coordination.

use thiserror::Error;

/// Errors raised by the readiness combinators and channels.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// A stream that was required to emit before readiness completed without emitting
    #[error("Stream '{stream}' completed before emitting a value")]
    EmptySource { stream: String },

    /// A value was pushed into a channel that already terminated
    #[error("Channel is closed")]
    ChannelClosed,
}

impl StreamError {
    /// Check if this error was caused by a dependency that never became ready
    pub fn is_empty_source(&self) -> bool {
        matches!(self, StreamError::EmptySource { .. })
    }

    /// Check if this error was caused by a closed channel
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamError::ChannelClosed)
    }
}

impl From<StreamError> for crate::Error {
    fn from(err: StreamError) -> Self {
        crate::Error::Stream(err)
    }
}
