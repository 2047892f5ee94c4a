//! Worker error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use vfilter_media::MediaError;
use vfilter_models::Stage;
use vfilter_separation::SeparationError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required tool, model or runtime is absent
    MissingCapability,
    /// FFmpeg/FFprobe failure or timeout
    MediaOperationFailure,
    /// Model inference failure
    SeparationFailure,
    /// Bad input rejected before processing
    ValidationFailure,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingCapability => "missing_capability",
            ErrorKind::MediaOperationFailure => "media_operation_failure",
            ErrorKind::SeparationFailure => "separation_failure",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn unit_label(unit: &Option<usize>) -> String {
    match unit {
        Some(index) => format!(" (chunk {})", index),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid input: {message}")]
    Validation {
        message: String,
        details: Option<String>,
    },

    #[error("Missing capability: {message}")]
    MissingCapability {
        message: String,
        details: Option<String>,
    },

    #[error("{stage} failed{}: {source}", unit_label(.unit))]
    Stage {
        stage: Stage,
        unit: Option<usize>,
        source: Box<WorkerError>,
    },

    #[error("Chunk {index} of {total} failed: {source}")]
    ChunkFailed {
        index: usize,
        total: usize,
        source: Box<WorkerError>,
    },

    #[error("Job cancelled before all chunks were dispatched")]
    Cancelled,

    #[error("Chunk worker process failed: {message}")]
    WorkerProcess {
        kind: ErrorKind,
        message: String,
        stderr: Option<String>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Separation(#[from] SeparationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn missing_capability(message: impl Into<String>, details: Option<String>) -> Self {
        Self::MissingCapability {
            message: message.into(),
            details,
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Attach the stage (and chunk index when chunked) the error came from.
    pub fn in_stage(self, stage: Stage, unit: Option<usize>) -> Self {
        Self::Stage {
            stage,
            unit,
            source: Box::new(self),
        }
    }

    /// Attach the chunk position within a chunked job.
    pub fn in_chunk(self, index: usize, total: usize) -> Self {
        Self::ChunkFailed {
            index,
            total,
            source: Box::new(self),
        }
    }

    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Validation { .. } | WorkerError::ConfigError(_) => ErrorKind::ValidationFailure,
            WorkerError::MissingCapability { .. } => ErrorKind::MissingCapability,
            WorkerError::Stage { source, .. } | WorkerError::ChunkFailed { source, .. } => source.kind(),
            WorkerError::Cancelled => ErrorKind::Cancelled,
            WorkerError::WorkerProcess { kind, .. } => *kind,
            WorkerError::Media(e) if e.is_missing_tool() => ErrorKind::MissingCapability,
            WorkerError::Media(e) if e.is_validation() => ErrorKind::ValidationFailure,
            WorkerError::Media(_) => ErrorKind::MediaOperationFailure,
            WorkerError::Separation(e) if e.is_prerequisite() => ErrorKind::MissingCapability,
            WorkerError::Separation(_) => ErrorKind::SeparationFailure,
            WorkerError::Io(_) | WorkerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Innermost stage named in the error chain.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WorkerError::Stage { stage, source, .. } => source.stage().or(Some(*stage)),
            WorkerError::ChunkFailed { source, .. } => source.stage(),
            _ => None,
        }
    }

    /// Chunk index named in the error chain.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            WorkerError::ChunkFailed { index, .. } => Some(*index),
            WorkerError::Stage { unit, source, .. } => unit.or_else(|| source.chunk_index()),
            _ => None,
        }
    }

    /// Captured tool diagnostics from anywhere in the chain.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            WorkerError::Stage { source, .. } | WorkerError::ChunkFailed { source, .. } => source.diagnostics(),
            WorkerError::Media(e) => e.diagnostics(),
            WorkerError::Separation(e) => e.details(),
            WorkerError::WorkerProcess { stderr, .. } => stderr.as_deref(),
            WorkerError::Validation { details, .. } | WorkerError::MissingCapability { details, .. } => {
                details.as_deref()
            }
            _ => None,
        }
    }

    /// Whether the error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
