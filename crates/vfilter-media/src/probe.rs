//! FFprobe container and audio stream information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::command::ffprobe_path;
use crate::error::{MediaError, MediaResult};

/// Default probe ceiling in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;

/// First audio stream information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Audio codec
    pub codec: String,
    /// Container duration in seconds
    pub duration: f64,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

/// Run ffprobe with the given arguments and parse its JSON output.
async fn run_ffprobe(
    operation: &str,
    path: &Path,
    args: &[&str],
    timeout_secs: u64,
) -> MediaResult<FfprobeOutput> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = ffprobe_path()?;

    let child = Command::new(&ffprobe)
        .args(["-v", "error"])
        .args(args)
        .args(["-of", "json"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child)
        .await
        .map_err(|_| MediaError::timeout(operation, timeout_secs))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::FfprobeNotFound,
            _ => MediaError::Io(e),
        })?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe could not read {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        });
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Container duration in seconds.
pub async fn probe_duration(path: impl AsRef<Path>, timeout_secs: u64) -> MediaResult<f64> {
    let path = path.as_ref();
    let probe = run_ffprobe("Duration probe", path, &["-show_entries", "format=duration"], timeout_secs).await?;

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| MediaError::FfprobeFailed {
            message: format!("Duration not found in ffprobe output for {}", path.display()),
            stderr: None,
        })?;

    debug!(path = %path.display(), duration, "Probed duration");
    Ok(duration)
}

/// Sample rate, channels and codec of the first audio stream.
pub async fn probe_audio(path: impl AsRef<Path>, timeout_secs: u64) -> MediaResult<AudioInfo> {
    let path = path.as_ref();
    let probe = run_ffprobe(
        "Audio probe",
        path,
        &[
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=sample_rate,channels,codec_name",
            "-show_entries",
            "format=duration",
        ],
        timeout_secs,
    )
    .await?;

    audio_info_from(probe).ok_or_else(|| MediaError::invalid_media(format!("No audio stream in {}", path.display())))
}

fn audio_info_from(probe: FfprobeOutput) -> Option<AudioInfo> {
    let stream = probe.streams.into_iter().next()?;
    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(AudioInfo {
        sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()).unwrap_or(44_100),
        channels: stream.channels.unwrap_or(2),
        codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
        duration,
    })
}
