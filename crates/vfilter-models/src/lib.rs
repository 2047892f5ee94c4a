//! Shared data models for the vocal filter pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Processing jobs and device selection
//! - Media units (whole videos or chunks)
//! - Chunk plans
//! - Stage progress events
//! - Job reports

pub mod chunk;
pub mod encoding;
pub mod job;
pub mod progress;
pub mod report;
pub mod unit;

// Re-export common types
pub use chunk::{ChunkPlan, ChunkSpan};
pub use encoding::{
    DEFAULT_AUDIO_BITRATE, DEFAULT_MODEL, DEFAULT_OUTPUT_SUFFIX, SUPPORTED_INPUT_EXTENSIONS,
};
pub use job::{DeviceSpec, DeviceSpecError, JobId, ProcessingJob, WatermarkMode};
pub use progress::{Stage, StageDetail, StageProgress};
pub use report::JobReport;
pub use unit::MediaUnit;
