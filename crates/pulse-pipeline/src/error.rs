use pulse_completion::{CompletionError, DecodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("store operation failed: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("unusable completion: {0}")]
    Content(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl StageError {
    pub fn is_content(&self) -> bool {
        match self {
            Self::Content(_) => true,
            Self::Completion(err) => err.is_content(),
            Self::Store(_) | Self::Integrity(_) => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::Completion(err) => !err.is_content(),
            Self::Content(_) | Self::Integrity(_) => false,
        }
    }
}

impl From<DecodeError> for StageError {
    fn from(err: DecodeError) -> Self {
        Self::Content(err.to_string())
    }
}
