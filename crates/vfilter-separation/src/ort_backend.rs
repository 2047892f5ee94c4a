//! ONNX Runtime separation backend.
//!
//! A model directory holds one folder per model id:
//!
//! ```text
//! <model_dir>/htdemucs/manifest.json
//! <model_dir>/htdemucs/htdemucs.onnx
//! ```
//!
//! The exported graph takes a `[1, 2, segment_samples]` waveform and returns
//! `[1, sources, 2, segment_samples]`.

use ndarray::{Array1, Array3};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::audio::Waveform;
use crate::device::Device;
use crate::error::{SeparationError, SeparationResult};
use crate::model::{ModelLoader, SeparationModel};
use crate::progress::ProgressHook;

pub const MANIFEST_FILE: &str = "manifest.json";

fn default_overlap() -> f32 {
    0.25
}

fn default_output_name() -> String {
    "sources".to_string()
}

/// Model description shipped next to the ONNX file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub sample_rate: u32,
    /// Samples per channel in one inference window
    pub segment_samples: usize,
    /// Fraction of each window shared with the next
    #[serde(default = "default_overlap")]
    pub overlap: f32,
    /// Output stream labels
    pub sources: Vec<String>,
    /// ONNX file name, relative to the manifest
    pub file: String,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

impl ModelManifest {
    fn validate(&self) -> SeparationResult<()> {
        if self.segment_samples == 0 || self.sources.is_empty() || self.sample_rate == 0 {
            return Err(SeparationError::prerequisite(
                "Model manifest is incomplete",
                Some("segment_samples, sample_rate and sources must be set".to_string()),
            ));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(SeparationError::prerequisite(
                format!("Model overlap {} outside [0, 1)", self.overlap),
                None,
            ));
        }
        Ok(())
    }

    /// Hop between consecutive windows.
    pub fn stride(&self) -> usize {
        ((self.segment_samples as f32 * (1.0 - self.overlap)) as usize).max(1)
    }
}

/// Loads models from a directory of manifests.
#[derive(Debug, Clone)]
pub struct OrtModelLoader {
    model_dir: PathBuf,
}

impl OrtModelLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn manifest_path(&self, model_id: &str) -> PathBuf {
        self.model_dir.join(model_id).join(MANIFEST_FILE)
    }

    pub fn read_manifest(&self, model_id: &str) -> SeparationResult<ModelManifest> {
        let path = self.manifest_path(model_id);
        let bytes = std::fs::read(&path).map_err(|e| {
            SeparationError::prerequisite(
                format!("Separation model '{}' is not installed", model_id),
                Some(format!("{}: {}", path.display(), e)),
            )
        })?;
        let manifest: ModelManifest = serde_json::from_slice(&bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

impl ModelLoader for OrtModelLoader {
    fn ensure_available(&self, model_id: &str) -> SeparationResult<()> {
        let manifest = self.read_manifest(model_id)?;
        let weights = self.model_dir.join(model_id).join(&manifest.file);
        if !weights.is_file() {
            return Err(SeparationError::prerequisite(
                format!("Separation model '{}' weights missing", model_id),
                Some(weights.display().to_string()),
            ));
        }
        Ok(())
    }

    fn load(&self, model_id: &str, device: Device) -> SeparationResult<Arc<dyn SeparationModel>> {
        let manifest = self.read_manifest(model_id)?;
        let weights = self.model_dir.join(model_id).join(&manifest.file);
        let session = create_session(&weights, device)?;

        Ok(Arc::new(OrtSeparator {
            session: Mutex::new(session),
            manifest,
            device,
        }))
    }
}

/// Create an ONNX Runtime session on `device`, falling back to CPU.
fn create_session(model_path: &Path, device: Device) -> SeparationResult<Session> {
    let model_bytes = std::fs::read(model_path).map_err(|e| {
        SeparationError::prerequisite(
            "Failed to read separation model",
            Some(format!("{}: {}", model_path.display(), e)),
        )
    })?;

    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    if let Device::Cuda(index) = device {
        #[cfg(feature = "cuda")]
        {
            use ort::execution_providers::CUDAExecutionProvider;
            if let Ok(cuda_builder) = builder
                .clone()
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(index as i32)
                    .build()])
            {
                if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                    info!("Using CUDA execution provider on device {}", index);
                    return Ok(session);
                }
            }
        }
        warn!("CUDA execution provider unavailable for device {}, using CPU", index);
    }

    debug!("Using CPU execution provider for separation");
    Ok(builder.commit_from_memory(&model_bytes)?)
}

/// Triangular cross-fade weights, peak 1.
fn triangular_window(len: usize) -> Array1<f32> {
    let half = len / 2;
    let rising = (1..=half).map(|v| v as f32);
    let falling = (1..=(len - half)).rev().map(|v| v as f32);
    let mut window: Array1<f32> = rising.chain(falling).collect();
    let peak = window.iter().cloned().fold(f32::MIN, f32::max).max(1.0);
    window.mapv_inplace(|w| w / peak);
    window
}

/// Separation model running an ONNX session window by window.
pub struct OrtSeparator {
    session: Mutex<Session>,
    manifest: ModelManifest,
    device: Device,
}

impl OrtSeparator {
    /// Run one `[1, 2, segment]` window and return `sources * 2 * segment` samples.
    fn run_window(&self, window: Vec<f32>) -> SeparationResult<Vec<f32>> {
        let seg = self.manifest.segment_samples;
        let expected = self.manifest.sources.len() * 2 * seg;

        let input: Value = Tensor::from_array((vec![1usize, 2, seg], window.into_boxed_slice())).map(Value::from)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| SeparationError::demucs("ORT session poisoned"))?;
        let outputs = session.run(ort::inputs![input])?;
        let output = outputs
            .get(self.manifest.output_name.as_str())
            .ok_or_else(|| SeparationError::demucs(format!("Missing output '{}'", self.manifest.output_name)))?;

        let (shape, data) = output.try_extract_tensor::<f32>()?;
        if data.len() != expected {
            return Err(SeparationError::demucs(format!(
                "Unexpected output shape {:?}, expected {} values",
                shape, expected
            )));
        }
        Ok(data.to_vec())
    }
}

impl SeparationModel for OrtSeparator {
    fn sample_rate(&self) -> u32 {
        self.manifest.sample_rate
    }

    fn sources(&self) -> &[String] {
        &self.manifest.sources
    }

    fn separate(&self, input: &Waveform, hook: &mut dyn ProgressHook) -> SeparationResult<Vec<Waveform>> {
        if input.num_channels() != 2 {
            return Err(SeparationError::demucs(format!(
                "Model expects stereo input, got {} channels",
                input.num_channels()
            )));
        }

        let frames = input.num_frames();
        let seg = self.manifest.segment_samples;
        let stride = self.manifest.stride();
        let n_sources = self.manifest.sources.len();
        let total_secs = input.duration_secs();
        let window = triangular_window(seg);

        let mut acc = Array3::<f32>::zeros((n_sources, 2, frames));
        let mut weight_sum = Array1::<f32>::zeros(frames);

        let mut offset = 0;
        while offset < frames {
            let len = seg.min(frames - offset);

            // Zero-padded [2, seg] window
            let mut chunk = vec![0.0f32; 2 * seg];
            for (c, channel) in input.channels.iter().enumerate() {
                chunk[c * seg..c * seg + len].copy_from_slice(&channel[offset..offset + len]);
            }

            let out = self.run_window(chunk)?;
            for s in 0..n_sources {
                for c in 0..2 {
                    let base = (s * 2 + c) * seg;
                    for i in 0..len {
                        acc[[s, c, offset + i]] += window[i] * out[base + i];
                    }
                }
            }
            for i in 0..len {
                weight_sum[offset + i] += window[i];
            }

            hook.on_progress((offset + len) as f64 / input.sample_rate as f64, total_secs);

            if offset + len >= frames {
                break;
            }
            offset += stride;
        }

        Ok((0..n_sources)
            .map(|s| {
                let channels = (0..2)
                    .map(|c| {
                        acc.slice(ndarray::s![s, c, ..])
                            .iter()
                            .zip(weight_sum.iter())
                            .map(|(v, w)| if *w > 0.0 { v / w } else { 0.0 })
                            .collect()
                    })
                    .collect();
                Waveform::new(input.sample_rate, channels)
            })
            .collect())
    }

    fn release_accelerator_memory(&self) {
        if !self.device.is_accelerator() {
            return;
        }

        #[cfg(feature = "cuda")]
        {
            if let Err(e) = self.shrink_arena() {
                warn!("Failed to release accelerator memory: {}", e);
            }
        }
    }
}

#[cfg(feature = "cuda")]
impl OrtSeparator {
    /// Run a silent window with arena shrinkage enabled so the CUDA arena
    /// hands unused blocks back to the device.
    fn shrink_arena(&self) -> SeparationResult<()> {
        use ort::session::RunOptions;

        let Device::Cuda(index) = self.device else {
            return Ok(());
        };

        let seg = self.manifest.segment_samples;
        let input: Value = Tensor::from_array((vec![1usize, 2, seg], vec![0.0f32; 2 * seg].into_boxed_slice()))
            .map(Value::from)?;

        let mut options = RunOptions::new()?;
        options.add_config_entry("memory.enable_memory_arena_shrinkage", format!("gpu:{}", index))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| SeparationError::demucs("ORT session poisoned"))?;
        session.run_with_options(ort::inputs![input], &options)?;
        debug!("Released CUDA arena memory on device {}", index);
        Ok(())
    }
}
