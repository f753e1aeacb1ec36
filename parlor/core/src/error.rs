//! Error Types
//!
//! Every failure is reported to the immediate caller as a value. None of them
//! leave the controller stuck: after any error it is back in `Idle` and
//! accepts a new turn.

use thiserror::Error;

/// Errors raised by an inference backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend cannot be reached or has nothing loaded
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend failed while producing output
    #[error("backend failed: {0}")]
    Failed(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Failed(err.to_string())
        }
    }
}

/// Errors surfaced by the generation controller
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerateError {
    /// Prompt was blank after trimming
    #[error("prompt text is empty")]
    EmptyPrompt,

    /// Prompt exceeds the configured size limit
    #[error("prompt is {len} bytes, limit is {max}")]
    PromptTooLong {
        /// Prompt size in bytes
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// A turn is active and has not been stopped
    #[error("a generation is already in progress; stop it first")]
    AlreadyGenerating,

    /// The backend could not be reached; the turn was rolled back
    #[error("inference backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend raised mid-generation; the turn was rolled back
    #[error("inference backend failed: {0}")]
    BackendFailure(String),

    /// The backend finished without producing any text; the turn was rolled back
    #[error("backend produced an empty response")]
    EmptyResponse,
}

impl GenerateError {
    /// Whether the error was caused by the caller rather than the backend
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyPrompt | Self::PromptTooLong { .. } | Self::AlreadyGenerating
        )
    }
}

impl From<BackendError> for GenerateError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => Self::BackendUnavailable(reason),
            BackendError::Failed(reason) => Self::BackendFailure(reason),
        }
    }
}
