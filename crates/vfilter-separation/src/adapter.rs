//! `isolate_vocals`: the adapter the pipeline calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use vfilter_models::DeviceSpec;

use crate::audio::{read_wav, write_wav, Waveform};
use crate::device::{resolve_device, AcceleratorProbe, Device, OrtAcceleratorProbe};
use crate::error::{SeparationError, SeparationResult};
use crate::model::{ModelCache, ModelLoader, SeparationModel};
use crate::ort_backend::OrtModelLoader;
use crate::progress::{NoopHook, ProgressHook, SeparationCallback, ThrottledProgress};

/// Name of the stream kept from the model output.
pub const VOCALS_SOURCE: &str = "vocals";

/// Vocal separation with a private model cache.
///
/// Clones share the cache.
#[derive(Clone)]
pub struct VocalSeparator {
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn AcceleratorProbe>,
    cache: Arc<ModelCache>,
}

impl VocalSeparator {
    pub fn new(loader: Arc<dyn ModelLoader>, probe: Arc<dyn AcceleratorProbe>) -> Self {
        Self {
            loader,
            probe,
            cache: Arc::new(ModelCache::new()),
        }
    }

    /// ONNX Runtime models from `model_dir`.
    pub fn with_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(OrtModelLoader::new(model_dir)),
            Arc::new(OrtAcceleratorProbe),
        )
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn resolve_device(&self, spec: DeviceSpec) -> Device {
        resolve_device(spec, self.probe.as_ref())
    }

    /// Fail with a prerequisite error when the model cannot be used at all.
    pub fn check_available(&self, model_id: &str) -> SeparationResult<()> {
        self.loader.ensure_available(model_id)
    }

    /// Write the vocals of `audio_in` to `audio_out`.
    ///
    /// Inference runs on the blocking pool. Progress is emitted only when the
    /// integer percent changes and always ends at 100 on success.
    pub async fn isolate_vocals(
        &self,
        audio_in: &Path,
        audio_out: &Path,
        device: DeviceSpec,
        model_id: &str,
        progress: Option<SeparationCallback>,
    ) -> SeparationResult<PathBuf> {
        let this = self.clone();
        let (audio_in, audio_out, model_id) = (audio_in.to_path_buf(), audio_out.to_path_buf(), model_id.to_string());

        tokio::task::spawn_blocking(move || this.isolate_vocals_blocking(&audio_in, &audio_out, device, &model_id, progress))
            .await
            .map_err(|e| SeparationError::demucs(format!("Separation task failed: {}", e)))?
    }

    /// Synchronous form of [`Self::isolate_vocals`].
    pub fn isolate_vocals_blocking(
        &self,
        audio_in: &Path,
        audio_out: &Path,
        device: DeviceSpec,
        model_id: &str,
        progress: Option<SeparationCallback>,
    ) -> SeparationResult<PathBuf> {
        let device = self.resolve_device(device);
        let model = self.cache.get_or_load(model_id, device, self.loader.as_ref())?;

        let started = Instant::now();
        let result = separate_vocals(model.as_ref(), audio_in, progress);

        // Release even when inference failed
        if device.is_accelerator() {
            model.release_accelerator_memory();
        }

        let vocals = result?;
        write_wav(audio_out, &vocals)?;

        metrics::histogram!("vfilter_separation_duration_seconds", "device" => device.to_string())
            .record(started.elapsed().as_secs_f64());
        info!(
            model = model_id,
            %device,
            audio_secs = vocals.duration_secs(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Vocals isolated"
        );

        Ok(audio_out.to_path_buf())
    }
}

fn separate_vocals(
    model: &dyn SeparationModel,
    audio_in: &Path,
    progress: Option<SeparationCallback>,
) -> SeparationResult<Waveform> {
    let wave = read_wav(audio_in)?;
    debug!(
        channels = wave.num_channels(),
        sample_rate = wave.sample_rate,
        "Loaded audio for separation"
    );
    let wave = wave.into_stereo()?.resample(model.sample_rate())?;
    let total_secs = wave.duration_secs();

    let mut throttled = progress.map(ThrottledProgress::new);
    let streams = match throttled.as_mut() {
        Some(hook) => model.separate(&wave, hook as &mut dyn ProgressHook)?,
        None => model.separate(&wave, &mut NoopHook)?,
    };

    let index = vocals_index(model.sources())?;
    let vocals = streams
        .into_iter()
        .nth(index)
        .ok_or(SeparationError::EmptyOutput)?;

    if let Some(hook) = throttled.as_mut() {
        hook.finish(total_secs);
    }
    Ok(vocals)
}

/// Index of the vocals stream, or the last stream when none is labelled so.
pub fn vocals_index(sources: &[String]) -> SeparationResult<usize> {
    if sources.is_empty() {
        return Err(SeparationError::EmptyOutput);
    }
    match sources.iter().position(|s| s == VOCALS_SOURCE) {
        Some(index) => Ok(index),
        None => {
            warn!(
                "Model sources {:?} have no '{}' stream, using the last one",
                sources, VOCALS_SOURCE
            );
            Ok(sources.len() - 1)
        }
    }
}
