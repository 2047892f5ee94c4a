//! Worker configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use vfilter_media::MediaTimeouts;
use vfilter_models::{DeviceSpec, ProcessingJob, WatermarkMode, DEFAULT_AUDIO_BITRATE, DEFAULT_MODEL};

use crate::chunking::ChunkPolicy;
use crate::dispatch::IsolationMode;
use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Requested separation device
    pub device: DeviceSpec,
    /// Separation model identifier
    pub model: String,
    /// Output AAC bitrate
    pub audio_bitrate: String,
    /// `None` = auto, `Some(0)` = disabled, `Some(d)` = chunks of `d` seconds
    pub chunk_duration: Option<f64>,
    /// Auto-chunking thresholds
    pub chunk_policy: ChunkPolicy,
    /// Maximum chunks processed concurrently
    pub parallelism: usize,
    /// How parallel chunks are isolated from each other
    pub isolation: IsolationMode,
    /// Directory holding `<model>/manifest.json`
    pub model_dir: PathBuf,
    /// Parent of job workspaces; system temp dir when unset
    pub work_dir: Option<PathBuf>,
    /// Remux perturbation
    pub watermark: WatermarkMode,
    /// FFmpeg ceilings
    pub timeouts: MediaTimeouts,
    /// Prometheus listener port
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            device: DeviceSpec::Auto,
            model: DEFAULT_MODEL.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            chunk_duration: None,
            chunk_policy: ChunkPolicy::default(),
            parallelism: 1,
            isolation: IsolationMode::Auto,
            model_dir: PathBuf::from("./models"),
            work_dir: None,
            watermark: WatermarkMode::Off,
            timeouts: MediaTimeouts::default(),
            metrics_port: None,
        }
    }
}

/// Parse an optional env var, failing on malformed values.
fn env_parse<T>(name: &str) -> WorkerResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| WorkerError::config_error(format!("{}={}: {}", name, raw, e))),
        _ => Ok(None),
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let default_timeouts = defaults.timeouts;

        let config = Self {
            device: env_parse("VFILTER_DEVICE")?.unwrap_or(defaults.device),
            model: std::env::var("VFILTER_MODEL").unwrap_or(defaults.model),
            audio_bitrate: std::env::var("VFILTER_BITRATE").unwrap_or(defaults.audio_bitrate),
            chunk_duration: env_parse("VFILTER_CHUNK_DURATION")?,
            chunk_policy: ChunkPolicy {
                auto_threshold_secs: env_parse("VFILTER_AUTO_CHUNK_THRESHOLD")?
                    .unwrap_or(defaults.chunk_policy.auto_threshold_secs),
                default_chunk_secs: env_parse("VFILTER_DEFAULT_CHUNK")?
                    .unwrap_or(defaults.chunk_policy.default_chunk_secs),
            },
            parallelism: env_parse::<usize>("VFILTER_PARALLELISM")?
                .unwrap_or(defaults.parallelism)
                .max(1),
            isolation: env_parse("VFILTER_ISOLATION")?.unwrap_or(defaults.isolation),
            model_dir: std::env::var("VFILTER_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            work_dir: std::env::var("VFILTER_WORK_DIR").ok().map(PathBuf::from),
            watermark: env_parse("VFILTER_WATERMARK")?.unwrap_or(defaults.watermark),
            timeouts: MediaTimeouts {
                probe_secs: env_parse("VFILTER_PROBE_TIMEOUT")?.unwrap_or(default_timeouts.probe_secs),
                extract_secs: env_parse("VFILTER_EXTRACT_TIMEOUT")?.unwrap_or(default_timeouts.extract_secs),
                remux_secs: env_parse("VFILTER_REMUX_TIMEOUT")?.unwrap_or(default_timeouts.remux_secs),
                split_per_chunk_secs: env_parse("VFILTER_SPLIT_TIMEOUT")?
                    .unwrap_or(default_timeouts.split_per_chunk_secs),
                concat_secs: env_parse("VFILTER_CONCAT_TIMEOUT")?.unwrap_or(default_timeouts.concat_secs),
            },
            metrics_port: env_parse("METRICS_PORT")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no job could run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.chunk_policy.default_chunk_secs <= 0.0 {
            return Err(WorkerError::config_error("default chunk duration must be positive"));
        }
        if self.chunk_policy.auto_threshold_secs < 0.0 {
            return Err(WorkerError::config_error("auto chunk threshold must not be negative"));
        }
        if self.model.trim().is_empty() {
            return Err(WorkerError::config_error("model id must not be empty"));
        }
        Ok(())
    }

    /// Build a job for `input` using these settings.
    pub fn job(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> ProcessingJob {
        ProcessingJob::new(input.as_ref(), output.as_ref())
            .with_device(self.device)
            .with_model(self.model.clone())
            .with_audio_bitrate(self.audio_bitrate.clone())
            .with_chunk_duration(self.chunk_duration)
            .with_parallelism(self.parallelism)
            .with_watermark(self.watermark)
    }

    /// Directory job workspaces are created in.
    pub fn work_root(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
