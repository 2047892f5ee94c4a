//! The media operations the pipeline consumes, behind a trait seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vfilter_models::{chunk::chunk_boundaries, WatermarkMode};

use crate::command::ensure_ffmpeg_available;
use crate::error::MediaResult;
use crate::probe::{AudioInfo, DEFAULT_PROBE_TIMEOUT_SECS};
use crate::progress::TransformProgress;
use crate::{audio, probe, remux, segment};

/// Upper bounds for each FFmpeg invocation, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTimeouts {
    pub probe_secs: u64,
    pub extract_secs: u64,
    pub remux_secs: u64,
    /// Applied to each chunk separately
    pub split_per_chunk_secs: u64,
    pub concat_secs: u64,
}

impl Default for MediaTimeouts {
    fn default() -> Self {
        Self {
            probe_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            extract_secs: 3600,
            remux_secs: 3600,
            split_per_chunk_secs: 600,
            concat_secs: 1800,
        }
    }
}

/// Media Transform operations.
///
/// Each operation either produces its complete output or fails with a
/// `MediaError`; no partial file is left at the output path.
#[async_trait]
pub trait MediaOps: Send + Sync {
    /// Fail with a missing-tool error when the backing tools are absent.
    fn ensure_available(&self) -> MediaResult<()>;

    /// Container duration in seconds.
    async fn probe_duration(&self, path: &Path) -> MediaResult<f64>;

    /// First audio stream details.
    async fn probe_audio(&self, path: &Path) -> MediaResult<AudioInfo>;

    /// Extract 16-bit PCM WAV.
    async fn extract_audio(
        &self,
        video: &Path,
        output_wav: &Path,
        sample_rate: Option<u32>,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf>;

    /// Replace the audio track.
    async fn remux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        bitrate: &str,
        watermark: WatermarkMode,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf>;

    /// Split into `floor(total / chunk_duration) + 1` stream-copied chunks, in order.
    async fn split(
        &self,
        video: &Path,
        output_dir: &Path,
        chunk_duration: f64,
        progress: &TransformProgress,
    ) -> MediaResult<Vec<PathBuf>>;

    /// Join in the given order without re-encoding.
    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf>;
}

/// `MediaOps` backed by the FFmpeg and FFprobe command-line tools.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMedia {
    timeouts: MediaTimeouts,
}

impl FfmpegMedia {
    pub fn new(timeouts: MediaTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl MediaOps for FfmpegMedia {
    fn ensure_available(&self) -> MediaResult<()> {
        ensure_ffmpeg_available()
    }

    async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        probe::probe_duration(path, self.timeouts.probe_secs).await
    }

    async fn probe_audio(&self, path: &Path) -> MediaResult<AudioInfo> {
        probe::probe_audio(path, self.timeouts.probe_secs).await
    }

    async fn extract_audio(
        &self,
        video: &Path,
        output_wav: &Path,
        sample_rate: Option<u32>,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf> {
        audio::extract_audio(video, output_wav, sample_rate, self.timeouts.extract_secs, progress).await
    }

    async fn remux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        bitrate: &str,
        watermark: WatermarkMode,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf> {
        remux::remux(video, audio, output, bitrate, watermark, self.timeouts.remux_secs, progress).await
    }

    async fn split(
        &self,
        video: &Path,
        output_dir: &Path,
        chunk_duration: f64,
        progress: &TransformProgress,
    ) -> MediaResult<Vec<PathBuf>> {
        let total = self.probe_duration(video).await?;
        let spans = chunk_boundaries(total, chunk_duration);
        segment::split_video(video, output_dir, &spans, self.timeouts.split_per_chunk_secs, progress).await
    }

    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf> {
        segment::concatenate_videos(inputs, output, self.timeouts.concat_secs, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let t = MediaTimeouts::default();
        assert_eq!(t.probe_secs, 30);
        assert_eq!(t.extract_secs, 3600);
        assert_eq!(t.remux_secs, 3600);
        assert_eq!(t.split_per_chunk_secs, 600);
        assert_eq!(t.concat_secs, 1800);
    }

    /// Needs ffmpeg and ffprobe on PATH.
    #[tokio::test]
    #[ignore]
    async fn test_split_then_concatenate_preserves_duration() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("tone.mp4");

        let status = tokio::process::Command::new("ffmpeg")
            .args([
                "-hide_banner", "-v", "error", "-y",
                "-f", "lavfi", "-i", "testsrc=duration=7:size=160x120:rate=25",
                "-f", "lavfi", "-i", "sine=frequency=440:duration=7",
                "-c:v", "libx264", "-g", "25", "-c:a", "aac", "-shortest",
            ])
            .arg(&source)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let media = FfmpegMedia::default();
        let total = media.probe_duration(&source).await.unwrap();
        let chunks = media
            .split(&source, &dir.path().join("chunks"), 3.0, &TransformProgress::none())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);

        let joined = dir.path().join("joined.mp4");
        media.concatenate(&chunks, &joined, &TransformProgress::none()).await.unwrap();
        let rejoined = media.probe_duration(&joined).await.unwrap();

        // Stream-copy cuts land on keyframes, one GOP of tolerance
        assert!((rejoined - total).abs() <= 1.0, "{} vs {}", rejoined, total);
    }
}
