//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_output_written, remove_if_exists};
use crate::progress::{FfmpegProgress, TransformProgress};

/// Number of stderr lines kept for error diagnostics.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// FFmpeg `-v` level; errors only, progress comes from `-progress`.
const LOG_LEVEL: &str = "error";

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in `-i` order; stream specifiers refer to these positions
    inputs: Vec<FfmpegInput>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command with a single input.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![FfmpegInput {
                args: Vec::new(),
                path: input.as_ref().to_path_buf(),
            }],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Append another input; subsequent `input_arg` calls apply to it.
    pub fn add_input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(FfmpegInput {
            args: Vec::new(),
            path: input.as_ref().to_path_buf(),
        });
        self
    }

    /// Add an argument placed before the most recently added `-i`.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(input) = self.inputs.last_mut() {
            input.args.push(arg.into());
        }
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(input) = self.inputs.last_mut() {
            input.args.extend(args.into_iter().map(Into::into));
        }
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before the current input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Limit output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Map a stream specifier into the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Set output audio sample rate.
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.output_arg("-ar").output_arg(rate.to_string())
    }

    /// Drop the video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Stream-copy every stream without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Stop at the end of the shortest stream.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Shift timestamps so the output starts at zero.
    pub fn avoid_negative_ts(self) -> Self {
        self.output_arg("-avoid_negative_ts").output_arg("make_zero")
    }

    /// Output path this command writes.
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-nostats".to_string()];

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(LOG_LEVEL.to_string());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and a bounded runtime.
///
/// There is no cooperative interrupt: a started command runs until it exits
/// or its timeout fires.
pub struct FfmpegRunner {
    /// Human-readable operation name used in errors and logs
    operation: String,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    /// Create a new runner for the named operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            timeout_secs: None,
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let ffmpeg = ffmpeg_path()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg ({}): {} {}", self.operation, ffmpeg.display(), args.join(" "));

        let started = Instant::now();
        let mut command = Command::new(&ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Keep terminal interrupts away from running transforms
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::FfmpegNotFound,
                _ => MediaError::Io(e),
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("FFmpeg stderr not captured", None, None))?;
        let mut reader = BufReader::new(stderr);

        // Progress lines go to the callback, everything else is kept as diagnostics
        let stderr_handle = tokio::spawn(async move {
            let mut current_progress = FfmpegProgress::default();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);

            while let Some(line) = next_lossy_line(&mut reader).await {
                match parse_progress_line(&line, &mut current_progress) {
                    LineKind::Progress(Some(progress)) => progress_callback(progress),
                    LineKind::Progress(None) => {}
                    LineKind::Diagnostic => {
                        if tail.len() == DIAGNOSTIC_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }

            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let result = self.wait_for_completion(&mut child).await;

        let diagnostics = stderr_handle.await.unwrap_or_default();

        metrics::histogram!(
            "vfilter_ffmpeg_duration_seconds",
            "operation" => self.operation.clone()
        )
        .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => Ok(()),
            Err(MediaError::FfmpegFailed {
                message, exit_code, ..
            }) => {
                let stderr = if diagnostics.trim().is_empty() {
                    None
                } else {
                    Some(diagnostics)
                };
                Err(MediaError::FfmpegFailed {
                    message,
                    stderr,
                    exit_code,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Run `cmd` so that it either leaves a non-empty output file or none at all.
    pub async fn run_to_output(&self, cmd: &FfmpegCommand, progress: &TransformProgress) -> MediaResult<()> {
        let output = cmd.output_path();
        let result = match self.run_with_progress(cmd, progress.ffmpeg_callback()).await {
            Ok(()) => ensure_output_written(output, &self.operation).await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = remove_if_exists(output).await {
                warn!("Failed to remove partial output {}: {}", output.display(), e);
            }
        }
        result
    }

    /// Wait for child process, killing it when the timeout fires.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let status = match self.timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("{} timed out after {} seconds, killing FFmpeg", self.operation, secs);
                    let _ = child.kill().await;
                    return Err(MediaError::timeout(self.operation.clone(), secs));
                }
            },
            None => child.wait().await?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                format!("{} failed", self.operation),
                None,
                status.code(),
            ))
        }
    }
}

/// Read one line, replacing invalid UTF-8 instead of stopping.
///
/// Returns `None` at EOF or on a read error. The pipe has to be drained to
/// the end, otherwise the writer dies of SIGPIPE.
pub async fn next_lossy_line<R>(reader: &mut BufReader<R>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(&buf);
            Some(line.trim_end_matches(['\n', '\r']).to_string())
        }
    }
}

enum LineKind {
    /// A `-progress` key; carries a snapshot when a block completes
    Progress(Option<FfmpegProgress>),
    Diagnostic,
}

/// Parse a line from FFmpeg's `-progress` output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> LineKind {
    let line = line.trim();

    let Some((key, value)) = line.split_once('=') else {
        return LineKind::Diagnostic;
    };

    match key {
        "out_time_ms" | "out_time_us" => {
            // Both keys are reported in microseconds by modern FFmpeg
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "speed" => {
            // Format: "1.5x" or "N/A"
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return LineKind::Progress(Some(current.clone()));
        }
        "frame" | "fps" | "bitrate" | "total_size" | "out_time" | "dup_frames" | "drop_frames"
        | "stream_0_0_q" => {}
        _ => return LineKind::Diagnostic,
    }

    LineKind::Progress(None)
}

/// Resolve a tool binary from an explicit env override, falling back to PATH.
fn resolve_tool(env_var: &str, name: &str) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(env_var) {
        let explicit = PathBuf::from(explicit);
        if explicit.is_file() {
            return Some(explicit);
        }
        warn!("{} points to missing file {}, searching PATH", env_var, explicit.display());
    }
    which::which(name).ok()
}

/// Locate the FFmpeg binary.
pub fn ffmpeg_path() -> MediaResult<PathBuf> {
    resolve_tool("FFMPEG_PATH", "ffmpeg").ok_or(MediaError::FfmpegNotFound)
}

/// Locate the FFprobe binary.
pub fn ffprobe_path() -> MediaResult<PathBuf> {
    resolve_tool("FFPROBE_PATH", "ffprobe").ok_or(MediaError::FfprobeNotFound)
}

/// Check that both FFmpeg and FFprobe are available.
pub fn ensure_ffmpeg_available() -> MediaResult<()> {
    ffmpeg_path()?;
    ffprobe_path()?;
    Ok(())
}
