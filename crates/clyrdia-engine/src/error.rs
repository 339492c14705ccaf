use clyrdia_ai::ModelError;
use clyrdia_core::text::ContentRejection;
use thiserror::Error;

use crate::extract::ExtractError;

/// Failures an analysis run reports to its caller. Persistence and cache
/// failures never appear here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported document type: {0}")]
    UnsupportedFormat(String),

    #[error("failed to extract text: {0}")]
    ExtractionFailed(String),

    #[error("document does not appear to be a valid contract: {0}")]
    NotAContract(#[from] ContentRejection),

    #[error("model invocation failed: {0}")]
    ModelInvocationFailed(#[from] ModelError),

    #[error("analysis did not complete: {0}")]
    PipelineIncomplete(String),

    #[error("analysis exceeded its time limit of {0}s")]
    Timeout(u64),
}

impl From<ExtractError> for PipelineError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsupportedFormat(m) => Self::UnsupportedFormat(m),
            ExtractError::ExtractionFailed(m) => Self::ExtractionFailed(m),
        }
    }
}

impl PipelineError {
    /// True for errors caused by what the caller submitted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::UnsupportedFormat(_) | Self::NotAContract(_)
        )
    }
}
