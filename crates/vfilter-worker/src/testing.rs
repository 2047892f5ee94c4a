//! Fakes standing in for FFmpeg and the separation model.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vfilter_media::{AudioInfo, MediaError, MediaOps, MediaResult, TransformProgress};
use vfilter_models::{chunk::chunk_boundaries, WatermarkMode};
use vfilter_separation::{
    read_wav, write_wav, AcceleratorProbe, Device, ModelLoader, ProgressHook, SeparationError,
    SeparationModel, SeparationResult, VocalSeparator, Waveform,
};

pub(crate) const FAKE_SAMPLE_RATE: u32 = 8000;

/// Amplitude of the extracted "mix"; vocals come out at half of it.
pub(crate) const MIX_LEVEL: f32 = 0.8;

/// Media fake working on small text files.
///
/// A "video" is a file whose content is a label. Remux writes
/// `<label>+<first vocals sample>` and concatenation joins contents in order.
#[derive(Default)]
pub(crate) struct FakeMedia {
    pub duration: f64,
    pub missing_tools: bool,
    /// Remux fails for videos whose label contains this marker
    pub fail_remux: Option<String>,
    /// Remux sleeps this long for videos whose label contains the key
    pub remux_delays: HashMap<String, u64>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn label(path: &Path) -> MediaResult<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

#[async_trait]
impl MediaOps for FakeMedia {
    fn ensure_available(&self) -> MediaResult<()> {
        if self.missing_tools {
            Err(MediaError::FfmpegNotFound)
        } else {
            Ok(())
        }
    }

    async fn probe_duration(&self, _path: &Path) -> MediaResult<f64> {
        Ok(self.duration)
    }

    async fn probe_audio(&self, _path: &Path) -> MediaResult<AudioInfo> {
        Err(MediaError::invalid_media("No audio stream found"))
    }

    async fn extract_audio(
        &self,
        video: &Path,
        output_wav: &Path,
        _sample_rate: Option<u32>,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf> {
        self.record(format!("extract:{}", label(video)?));
        progress.report(50);
        write_wav(output_wav, &Waveform::new(FAKE_SAMPLE_RATE, vec![vec![MIX_LEVEL; 800]]))
            .map_err(|e| MediaError::invalid_media(e.to_string()))?;
        progress.report(100);
        Ok(output_wav.to_path_buf())
    }

    async fn remux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _bitrate: &str,
        _watermark: WatermarkMode,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf> {
        let name = label(video)?;
        self.record(format!("remux:{}", name));

        if let Some((_, ms)) = self.remux_delays.iter().find(|(key, _)| name.contains(key.as_str())) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if matches!(&self.fail_remux, Some(marker) if name.contains(marker.as_str())) {
            return Err(MediaError::ffmpeg_failed(
                "Video remuxing failed",
                Some("Conversion failed!".to_string()),
                Some(1),
            ));
        }

        let vocals = read_wav(audio).map_err(|e| MediaError::invalid_media(e.to_string()))?;
        let sample = vocals.channels.first().and_then(|c| c.first()).copied().unwrap_or(0.0);
        progress.report(100);
        std::fs::write(output, format!("{}+{:.2}\n", name, sample))?;
        Ok(output.to_path_buf())
    }

    async fn split(
        &self,
        _video: &Path,
        output_dir: &Path,
        chunk_duration: f64,
        progress: &TransformProgress,
    ) -> MediaResult<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)?;
        let spans = chunk_boundaries(self.duration, chunk_duration);
        let mut paths = Vec::with_capacity(spans.len());
        for span in &spans {
            let path = output_dir.join(format!("chunk_{:03}.mp4", span.index));
            std::fs::write(&path, format!("chunk{:03}", span.index))?;
            paths.push(path);
            progress.report(((span.index + 1) * 100 / spans.len()) as u8);
        }
        self.record(format!("split:{}", spans.len()));
        Ok(paths)
    }

    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        progress: &TransformProgress,
    ) -> MediaResult<PathBuf> {
        let mut joined = String::new();
        for input in inputs {
            joined.push_str(&std::fs::read_to_string(input)?);
        }
        std::fs::write(output, joined)?;
        self.record(format!("concat:{}", inputs.len()));
        progress.report(100);
        Ok(output.to_path_buf())
    }
}

/// Two-stream model returning silence and the input at half level.
pub(crate) struct HalfVocalsModel {
    sources: Vec<String>,
}

impl SeparationModel for HalfVocalsModel {
    fn sample_rate(&self) -> u32 {
        FAKE_SAMPLE_RATE
    }

    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn separate(&self, input: &Waveform, hook: &mut dyn ProgressHook) -> SeparationResult<Vec<Waveform>> {
        let total = input.duration_secs();
        for step in 1..=4 {
            hook.on_progress(total * step as f64 / 4.0, total);
        }
        let scaled = |gain: f32| {
            Waveform::new(
                input.sample_rate,
                input.channels.iter().map(|c| c.iter().map(|s| s * gain).collect()).collect(),
            )
        };
        Ok(vec![scaled(0.0), scaled(0.5)])
    }
}

#[derive(Default)]
pub(crate) struct FakeLoader {
    pub loads: AtomicUsize,
}

impl ModelLoader for FakeLoader {
    fn ensure_available(&self, model_id: &str) -> SeparationResult<()> {
        if model_id == "htdemucs" {
            Ok(())
        } else {
            Err(SeparationError::prerequisite(
                format!("Model '{}' not found", model_id),
                None,
            ))
        }
    }

    fn load(&self, model_id: &str, _device: Device) -> SeparationResult<Arc<dyn SeparationModel>> {
        self.ensure_available(model_id)?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(HalfVocalsModel {
            sources: vec!["accompaniment".to_string(), "vocals".to_string()],
        }))
    }
}

pub(crate) struct CpuOnly;

impl AcceleratorProbe for CpuOnly {
    fn cuda_available(&self, _index: u32) -> bool {
        false
    }
}

pub(crate) fn fake_separator() -> VocalSeparator {
    VocalSeparator::new(Arc::new(FakeLoader::default()), Arc::new(CpuOnly))
}

/// Write a labelled fake video.
pub(crate) fn fake_video(dir: &Path, name: &str, label: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, label).unwrap();
    path
}
