//! Audio track replacement.

use std::path::{Path, PathBuf};
use tracing::debug;
use vfilter_models::encoding::OUTPUT_AUDIO_CODEC;
use vfilter_models::WatermarkMode;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::progress::TransformProgress;
use crate::watermark::{detect_video_encoder, PerturbationConfig};

/// Build the remux command.
///
/// Without perturbation the video stream is copied untouched. The output is
/// cut to the shorter of the two input streams.
pub fn build_remux_command(
    video: &Path,
    audio: &Path,
    output: &Path,
    bitrate: &str,
    perturbation: Option<(&PerturbationConfig, &[&str])>,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(video, output).add_input(audio);

    let cmd = match perturbation {
        Some((config, encoder_args)) => cmd
            .filter_complex(config.filter_complex())
            .map("[v]")
            .map("[a]")
            .output_args(encoder_args.iter().copied()),
        None => cmd.map("0:v").map("1:a").video_codec("copy"),
    };

    cmd.audio_codec(OUTPUT_AUDIO_CODEC)
        .audio_bitrate(bitrate)
        .shortest()
}

/// Replace the audio track of `video` with `audio`, encoding AAC at `bitrate`.
pub async fn remux(
    video: impl AsRef<Path>,
    audio: impl AsRef<Path>,
    output: impl AsRef<Path>,
    bitrate: &str,
    watermark: WatermarkMode,
    timeout_secs: u64,
    progress: &TransformProgress,
) -> MediaResult<PathBuf> {
    let (video, audio, output) = (video.as_ref(), audio.as_ref(), output.as_ref());
    debug!(?watermark, "Remuxing {} with new audio", video.display());

    let cmd = if watermark.is_enabled() {
        let encoder_args = detect_video_encoder().await.args();
        let config = PerturbationConfig::default();
        build_remux_command(video, audio, output, bitrate, Some((&config, encoder_args.as_slice())))
    } else {
        build_remux_command(video, audio, output, bitrate, None)
    };

    FfmpegRunner::new("Video remuxing")
        .with_timeout(timeout_secs)
        .run_to_output(&cmd, progress)
        .await?;

    debug!("Video remuxed to {}", output.display());
    Ok(output.to_path_buf())
}
