//! Error types for vocal separation.

use thiserror::Error;

/// Result type for separation operations.
pub type SeparationResult<T> = Result<T, SeparationError>;

/// Errors raised by the separation adapter.
///
/// `Prerequisite` means the capability itself is missing (model files,
/// runtime). Everything else is an in-flight failure.
#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("{message}")]
    Prerequisite {
        message: String,
        details: Option<String>,
    },

    #[error("Vocal separation failed: {message}")]
    Demucs { message: String },

    #[error("Model output has no streams")]
    EmptyOutput,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Invalid model manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeparationError {
    pub fn prerequisite(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Prerequisite {
            message: message.into(),
            details,
        }
    }

    pub fn demucs(message: impl Into<String>) -> Self {
        Self::Demucs {
            message: message.into(),
        }
    }

    /// Whether the separation capability is unavailable, as opposed to failing mid-run.
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, SeparationError::Prerequisite { .. })
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            SeparationError::Prerequisite { details, .. } => details.as_deref(),
            _ => None,
        }
    }
}

impl From<ort::Error> for SeparationError {
    fn from(e: ort::Error) -> Self {
        SeparationError::demucs(format!("ONNX Runtime: {}", e))
    }
}
