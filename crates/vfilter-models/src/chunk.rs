//! Chunk plans.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spans shorter than this at the end of a plan are dropped.
///
/// `floor(total / chunk) + 1` yields an empty trailing span when the total
/// duration is an exact multiple of the chunk duration.
pub const MIN_TAIL_SECS: f64 = 1e-3;

/// A contiguous time slice `[start, end)` of the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChunkSpan {
    /// Chunk position (0-based)
    pub index: usize,
    /// Start time in seconds (inclusive)
    pub start: f64,
    /// End time in seconds (exclusive)
    pub end: f64,
}

impl ChunkSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Decision on how a job is split into units. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ChunkPlan {
    /// Process the whole input as one unit.
    Monolithic,
    /// Split into time-bounded chunks.
    Chunked {
        chunk_duration: f64,
        chunk_count: usize,
        boundaries: Vec<ChunkSpan>,
    },
}

impl ChunkPlan {
    /// Build a chunked plan covering `[0, total_duration)`.
    ///
    /// The last chunk may be shorter than `chunk_duration`.
    pub fn chunked(total_duration: f64, chunk_duration: f64) -> Self {
        let boundaries = chunk_boundaries(total_duration, chunk_duration);
        ChunkPlan::Chunked {
            chunk_duration,
            chunk_count: boundaries.len(),
            boundaries,
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, ChunkPlan::Chunked { .. })
    }

    /// Number of units the job will process.
    pub fn unit_count(&self) -> usize {
        match self {
            ChunkPlan::Monolithic => 1,
            ChunkPlan::Chunked { chunk_count, .. } => *chunk_count,
        }
    }

    pub fn mode_label(&self) -> &'static str {
        match self {
            ChunkPlan::Monolithic => "monolithic",
            ChunkPlan::Chunked { .. } => "chunked",
        }
    }
}

/// Compute `floor(total / chunk) + 1` contiguous spans, dropping an empty tail.
pub fn chunk_boundaries(total_duration: f64, chunk_duration: f64) -> Vec<ChunkSpan> {
    if total_duration <= 0.0 || chunk_duration <= 0.0 {
        return Vec::new();
    }

    let count = (total_duration / chunk_duration).floor() as usize + 1;
    (0..count)
        .map(|index| {
            let start = index as f64 * chunk_duration;
            let end = ((index + 1) as f64 * chunk_duration).min(total_duration);
            ChunkSpan { index, start, end }
        })
        .filter(|span| span.index == 0 || span.duration() >= MIN_TAIL_SECS)
        .collect()
}
