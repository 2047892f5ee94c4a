//! Chunk planning.

use serde::{Deserialize, Serialize};
use vfilter_models::ChunkPlan;

/// Auto-chunking thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Inputs longer than this are chunked in auto mode (seconds)
    pub auto_threshold_secs: f64,
    /// Chunk length used in auto mode (seconds)
    pub default_chunk_secs: f64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            auto_threshold_secs: 30.0 * 60.0,
            default_chunk_secs: 15.0 * 60.0,
        }
    }
}

impl ChunkPolicy {
    /// Decide how to split a job of `total_duration` seconds.
    ///
    /// - `Some(0)` (or negative): never chunk.
    /// - `Some(d)`: chunk by `d` when the input is longer than `d`.
    /// - `None`: chunk by the default length when the input exceeds the auto threshold.
    pub fn plan(&self, total_duration: f64, chunk_override: Option<f64>) -> ChunkPlan {
        match chunk_override {
            Some(d) if d <= 0.0 => ChunkPlan::Monolithic,
            Some(d) if total_duration > d => ChunkPlan::chunked(total_duration, d),
            Some(_) => ChunkPlan::Monolithic,
            None if total_duration > self.auto_threshold_secs => {
                ChunkPlan::chunked(total_duration, self.default_chunk_secs)
            }
            None => ChunkPlan::Monolithic,
        }
    }
}
