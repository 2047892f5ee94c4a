#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for the media transform layer.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Bounded runtimes with captured stderr diagnostics
//! - Probe, audio extraction, remux, lossless split and concatenation
//! - Write-then-rename finalisation of outputs

pub mod audio;
pub mod command;
pub mod error;
pub mod fs_utils;
pub mod ops;
pub mod probe;
pub mod progress;
pub mod remux;
pub mod segment;
pub mod validate;
pub mod watermark;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use audio::extract_audio;
pub use command::{
    ensure_ffmpeg_available, ffmpeg_path, ffprobe_path, next_lossy_line, FfmpegCommand, FfmpegRunner,
};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{file_size_mb, move_file, remove_if_exists};
pub use ops::{FfmpegMedia, MediaOps, MediaTimeouts};
pub use probe::{probe_audio, probe_duration, AudioInfo};
pub use progress::{FfmpegProgress, PercentFn, TransformProgress};
pub use remux::remux;
pub use segment::{concatenate_videos, keep_ranges, remove_segments, split_video};
pub use validate::{default_output_path, same_file, validate_input_file};
pub use watermark::{detect_video_encoder, PerturbationConfig, VideoEncoder};
