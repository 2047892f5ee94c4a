//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found (set FFMPEG_PATH or add ffmpeg to PATH)")]
    FfmpegNotFound,

    #[error("FFprobe not found (set FFPROBE_PATH or add ffprobe to PATH)")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("{operation} timed out after {secs} seconds")]
    Timeout { operation: String, secs: u64 },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid input: {message}")]
    Validation {
        message: String,
        details: Option<String>,
    },

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create an input validation error.
    pub fn validation(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    /// Create an invalid media error.
    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self::InvalidMedia(message.into())
    }

    /// Whether the error means a required tool is not installed.
    pub fn is_missing_tool(&self) -> bool {
        matches!(self, MediaError::FfmpegNotFound | MediaError::FfprobeNotFound)
    }

    /// Whether the input itself was rejected before processing.
    pub fn is_validation(&self) -> bool {
        matches!(self, MediaError::Validation { .. } | MediaError::FileNotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout { .. })
    }

    /// Captured tool diagnostics, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } | MediaError::FfprobeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            MediaError::Validation { details, .. } => details.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_exposed() {
        let err = MediaError::ffmpeg_failed(
            "Video concatenation failed",
            Some("Invalid data found when processing input".to_string()),
            Some(1),
        );
        assert_eq!(err.diagnostics(), Some("Invalid data found when processing input"));
        assert!(!err.is_missing_tool());
    }

    #[test]
    fn test_timeout_message_names_operation() {
        let err = MediaError::timeout("Audio extraction", 3600);
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Audio extraction timed out after 3600 seconds");
    }
}
