//! Execution device resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use vfilter_models::DeviceSpec;

/// A concrete device the model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl From<Device> for DeviceSpec {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => DeviceSpec::Cpu,
            Device::Cuda(index) => DeviceSpec::Cuda(Some(index)),
        }
    }
}

/// Reports which accelerators can be used in this process.
pub trait AcceleratorProbe: Send + Sync {
    fn cuda_available(&self, index: u32) -> bool;
}

/// Asks ONNX Runtime whether its CUDA execution provider can be registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtAcceleratorProbe;

impl AcceleratorProbe for OrtAcceleratorProbe {
    #[cfg(feature = "cuda")]
    fn cuda_available(&self, index: u32) -> bool {
        use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

        let available = CUDAExecutionProvider::default()
            .with_device_id(index as i32)
            .is_available()
            .unwrap_or(false);
        debug!(index, available, "Probed CUDA execution provider");
        available
    }

    #[cfg(not(feature = "cuda"))]
    fn cuda_available(&self, index: u32) -> bool {
        debug!(index, "Built without CUDA support");
        false
    }
}

/// Map a requested device onto one that exists.
///
/// `auto` prefers CUDA device 0. An explicit CUDA request that cannot be
/// satisfied degrades to CPU with a warning rather than failing.
pub fn resolve_device(spec: DeviceSpec, probe: &dyn AcceleratorProbe) -> Device {
    match spec {
        DeviceSpec::Cpu => Device::Cpu,
        DeviceSpec::Auto => {
            if probe.cuda_available(0) {
                Device::Cuda(0)
            } else {
                Device::Cpu
            }
        }
        DeviceSpec::Cuda(index) => {
            let index = index.unwrap_or(0);
            if probe.cuda_available(index) {
                Device::Cuda(index)
            } else {
                warn!("CUDA device {} requested but not available, falling back to CPU", index);
                Device::Cpu
            }
        }
    }
}
