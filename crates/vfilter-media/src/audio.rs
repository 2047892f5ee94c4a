//! Audio extraction.

use std::path::{Path, PathBuf};
use tracing::debug;
use vfilter_models::encoding::EXTRACT_AUDIO_CODEC;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::progress::TransformProgress;

/// Extract the audio track of `video` to 16-bit PCM WAV.
///
/// Channel layout is preserved. The sample rate is preserved unless
/// `sample_rate` is given.
pub async fn extract_audio(
    video: impl AsRef<Path>,
    output_wav: impl AsRef<Path>,
    sample_rate: Option<u32>,
    timeout_secs: u64,
    progress: &TransformProgress,
) -> MediaResult<PathBuf> {
    let video = video.as_ref();
    let output_wav = output_wav.as_ref();
    debug!("Extracting audio from {}", video.display());

    let mut cmd = FfmpegCommand::new(video, output_wav)
        .no_video()
        .audio_codec(EXTRACT_AUDIO_CODEC);
    if let Some(rate) = sample_rate {
        cmd = cmd.audio_sample_rate(rate);
    }

    FfmpegRunner::new("Audio extraction")
        .with_timeout(timeout_secs)
        .run_to_output(&cmd, progress)
        .await?;

    debug!("Audio extracted to {}", output_wav.display());
    Ok(output_wav.to_path_buf())
}
