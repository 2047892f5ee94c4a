//! Separation model seam and the per-adapter model cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::audio::Waveform;
use crate::device::Device;
use crate::error::{SeparationError, SeparationResult};
use crate::progress::ProgressHook;

/// A loaded source-separation model.
pub trait SeparationModel: Send + Sync {
    /// Sample rate the model expects.
    fn sample_rate(&self) -> u32;

    /// Output stream labels, in output order.
    fn sources(&self) -> &[String];

    /// Split a stereo waveform at `sample_rate()` into one waveform per source.
    fn separate(&self, input: &Waveform, hook: &mut dyn ProgressHook) -> SeparationResult<Vec<Waveform>>;

    /// Return cached accelerator allocations to the device.
    fn release_accelerator_memory(&self) {}
}

/// Locates and loads models.
pub trait ModelLoader: Send + Sync {
    /// Fail with `SeparationError::Prerequisite` when `model_id` cannot be loaded at all.
    fn ensure_available(&self, model_id: &str) -> SeparationResult<()>;

    fn load(&self, model_id: &str, device: Device) -> SeparationResult<Arc<dyn SeparationModel>>;
}

type CacheKey = (String, Device);

/// Loaded models keyed by `(model_id, device)`.
///
/// Each key is loaded at most once for the cache's lifetime.
#[derive(Default)]
pub struct ModelCache {
    models: Mutex<HashMap<CacheKey, Arc<dyn SeparationModel>>>,
    loads: AtomicUsize,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached model or load it through `loader`.
    pub fn get_or_load(
        &self,
        model_id: &str,
        device: Device,
        loader: &dyn ModelLoader,
    ) -> SeparationResult<Arc<dyn SeparationModel>> {
        // Held across the load so concurrent callers never load the same key twice
        let mut models = self
            .models
            .lock()
            .map_err(|_| SeparationError::demucs("Model cache lock poisoned"))?;

        let key = (model_id.to_string(), device);
        if let Some(model) = models.get(&key) {
            return Ok(model.clone());
        }

        info!(model = model_id, %device, "Loading separation model");
        let model = loader.load(model_id, device)?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("vfilter_model_loads_total", "model" => model_id.to_string(), "device" => device.to_string())
            .increment(1);

        models.insert(key, model.clone());
        Ok(model)
    }

    /// Number of loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.models.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Model returning two scaled copies of the input: "drums" then "vocals".
    pub(crate) struct ScaleModel {
        pub sources: Vec<String>,
        pub rate: u32,
        pub steps: usize,
        pub released: Arc<AtomicBool>,
    }

    impl ScaleModel {
        pub(crate) fn new(sources: &[&str]) -> Self {
            Self {
                sources: sources.iter().map(|s| s.to_string()).collect(),
                rate: 44_100,
                steps: 10,
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl SeparationModel for ScaleModel {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn sources(&self) -> &[String] {
            &self.sources
        }

        fn separate(&self, input: &Waveform, hook: &mut dyn ProgressHook) -> SeparationResult<Vec<Waveform>> {
            let total = input.duration_secs();
            for step in 1..=self.steps {
                hook.on_progress(total * step as f64 / self.steps as f64, total);
            }
            Ok((0..self.sources.len())
                .map(|i| {
                    let scale = (i + 1) as f32;
                    let channels = input
                        .channels
                        .iter()
                        .map(|c| c.iter().map(|s| s * scale).collect())
                        .collect();
                    Waveform::new(input.sample_rate, channels)
                })
                .collect())
        }

        fn release_accelerator_memory(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Loader handing out `ScaleModel`s and counting calls.
    pub(crate) struct CountingLoader {
        pub sources: Vec<&'static str>,
        pub calls: AtomicUsize,
        pub released: Arc<AtomicBool>,
        pub known: Vec<&'static str>,
    }

    impl CountingLoader {
        pub(crate) fn new(sources: Vec<&'static str>) -> Self {
            Self {
                sources,
                calls: AtomicUsize::new(0),
                released: Arc::new(AtomicBool::new(false)),
                known: vec!["htdemucs"],
            }
        }
    }

    impl ModelLoader for CountingLoader {
        fn ensure_available(&self, model_id: &str) -> SeparationResult<()> {
            if self.known.contains(&model_id) {
                Ok(())
            } else {
                Err(SeparationError::prerequisite(format!("Model {} not found", model_id), None))
            }
        }

        fn load(&self, model_id: &str, _device: Device) -> SeparationResult<Arc<dyn SeparationModel>> {
            self.ensure_available(model_id)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut model = ScaleModel::new(&self.sources);
            model.released = self.released.clone();
            Ok(Arc::new(model))
        }
    }

    #[test]
    fn test_cache_loads_once_per_key() {
        let cache = ModelCache::new();
        let loader = CountingLoader::new(vec!["drums", "vocals"]);

        let a = cache.get_or_load("htdemucs", Device::Cpu, &loader).unwrap();
        let b = cache.get_or_load("htdemucs", Device::Cpu, &loader).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.load_count(), 1);

        cache.get_or_load("htdemucs", Device::Cuda(0), &loader).unwrap();
        assert_eq!(cache.load_count(), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let cache = ModelCache::new();
        let loader = CountingLoader::new(vec!["vocals"]);

        assert!(cache.get_or_load("missing", Device::Cpu, &loader).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.load_count(), 0);
    }
}
