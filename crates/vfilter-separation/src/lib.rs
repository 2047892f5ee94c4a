//! Vocal separation adapter.
//!
//! Wraps a source-separation model behind [`SeparationModel`], resolves the
//! execution device, caches loaded models per `(model_id, device)` and
//! re-emits the model's internal loop progress as throttled percent events.

pub mod adapter;
pub mod audio;
pub mod device;
pub mod error;
pub mod model;
pub mod ort_backend;
pub mod progress;

pub use adapter::{vocals_index, VocalSeparator, VOCALS_SOURCE};
pub use audio::{read_wav, write_wav, Waveform};
pub use device::{resolve_device, AcceleratorProbe, Device, OrtAcceleratorProbe};
pub use error::{SeparationError, SeparationResult};
pub use model::{ModelCache, ModelLoader, SeparationModel};
pub use ort_backend::{ModelManifest, OrtModelLoader, OrtSeparator, MANIFEST_FILE};
pub use progress::{NoopHook, ProgressHook, SeparationCallback, SeparationProgress, ThrottledProgress};
