//! Media units: the granularity the single-unit processor operates on.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A time-bounded, playable media file on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaUnit {
    /// File path
    pub path: PathBuf,
    /// Duration in seconds (from probe)
    pub duration: f64,
    /// Chunk position; 0 for non-chunked jobs
    pub index: usize,
    /// Whether the core created this file and may delete it once consumed.
    /// The original input is never disposable.
    pub disposable: bool,
}

impl MediaUnit {
    /// The job's original input.
    pub fn source(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
            index: 0,
            disposable: false,
        }
    }

    /// A chunk produced by splitting.
    pub fn chunk(path: impl Into<PathBuf>, duration: f64, index: usize) -> Self {
        Self {
            path: path.into(),
            duration,
            index,
            disposable: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_is_never_disposable() {
        let unit = MediaUnit::source("/videos/in.mp4", 12.5);
        assert!(!unit.disposable);
        assert_eq!(unit.index, 0);

        let chunk = MediaUnit::chunk("/tmp/in_chunk_002.mp4", 900.0, 2);
        assert!(chunk.disposable);
        assert_eq!(chunk.index, 2);
    }
}
