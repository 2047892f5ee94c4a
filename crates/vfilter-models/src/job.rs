//! Processing job definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::encoding::{DEFAULT_AUDIO_BITRATE, DEFAULT_MODEL};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a device string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device '{0}': expected auto, cpu, cuda or cuda:<index>")]
pub struct DeviceSpecError(pub String);

/// Requested execution device for the separation model.
///
/// This is the caller's request; the separation adapter resolves it against
/// what is actually available at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSpec {
    /// Prefer an accelerator, fall back to CPU.
    #[default]
    Auto,
    /// Always run on CPU.
    Cpu,
    /// A CUDA device, optionally by ordinal.
    Cuda(Option<u32>),
}

impl DeviceSpec {
    /// Whether the request names an accelerator explicitly.
    pub fn is_accelerator(&self) -> bool {
        matches!(self, DeviceSpec::Cuda(_))
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Auto => write!(f, "auto"),
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(None) => write!(f, "cuda"),
            DeviceSpec::Cuda(Some(index)) => write!(f, "cuda:{}", index),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = DeviceSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "auto" => Ok(DeviceSpec::Auto),
            "cpu" => Ok(DeviceSpec::Cpu),
            "cuda" | "gpu" => Ok(DeviceSpec::Cuda(None)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse::<u32>().ok())
                .map(|index| DeviceSpec::Cuda(Some(index)))
                .ok_or_else(|| DeviceSpecError(s.to_string())),
        }
    }
}

impl TryFrom<String> for DeviceSpec {
    type Error = DeviceSpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceSpec> for String {
    fn from(value: DeviceSpec) -> Self {
        value.to_string()
    }
}

/// Optional visual/temporal perturbation applied during remux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkMode {
    /// Copy the video stream losslessly.
    #[default]
    Off,
    /// Re-encode with speed change, padding, periodic blackout and color shift.
    Perturb,
}

impl WatermarkMode {
    pub fn is_enabled(&self) -> bool {
        matches!(self, WatermarkMode::Perturb)
    }
}

impl FromStr for WatermarkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "false" | "0" => Ok(WatermarkMode::Off),
            "perturb" | "on" | "true" | "1" => Ok(WatermarkMode::Perturb),
            other => Err(format!("invalid watermark mode '{}'", other)),
        }
    }
}

/// One full run from input file to output file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingJob {
    /// Job identifier
    #[serde(default)]
    pub id: JobId,
    /// Input media file
    pub input: PathBuf,
    /// Final output path
    pub output: PathBuf,
    /// Requested separation device
    #[serde(default)]
    pub device: DeviceSpec,
    /// Separation model identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// Output AAC bitrate (e.g. "192k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Chunk duration override in seconds.
    ///
    /// `None` selects automatic chunking, `Some(0.0)` disables chunking,
    /// any positive value forces chunks of that length.
    #[serde(default)]
    pub chunk_duration: Option<f64>,
    /// Maximum number of chunks processed concurrently
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Remux perturbation mode
    #[serde(default)]
    pub watermark: WatermarkMode,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}
fn default_parallelism() -> usize {
    1
}

impl ProcessingJob {
    /// Create a job with default settings.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            id: JobId::new(),
            input: input.into(),
            output: output.into(),
            device: DeviceSpec::Auto,
            model: default_model(),
            audio_bitrate: default_audio_bitrate(),
            chunk_duration: None,
            parallelism: 1,
            watermark: WatermarkMode::Off,
        }
    }

    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.device = device;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_audio_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.audio_bitrate = bitrate.into();
        self
    }

    pub fn with_chunk_duration(mut self, seconds: Option<f64>) -> Self {
        self.chunk_duration = seconds;
        self
    }

    /// Set parallelism (clamped to at least 1).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_watermark(mut self, mode: WatermarkMode) -> Self {
        self.watermark = mode;
        self
    }
}
