//! Backend selection
//!
//! NdArray (CPU) is always compiled in. With the `cuda` feature the CUDA
//! backend is compiled as well and picked at runtime when an NVIDIA GPU is
//! visible. Callers dispatch on [`ComputeDevice`] and run generic code over
//! the chosen Burn backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

/// CPU backend, always available
pub type CpuBackend = burn_ndarray::NdArray<f32>;

/// GPU backend
#[cfg(feature = "cuda")]
pub type GpuBackend = burn_cuda::Cuda;

/// Autodiff wrapper of the CPU backend used for training
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

#[cfg(feature = "cuda")]
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

/// Compute device chosen at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda,
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "NdArray (CPU)"),
            ComputeDevice::Cuda => write!(f, "CUDA (GPU)"),
        }
    }
}

/// Pick CUDA if it was compiled in and a GPU is present, else CPU.
///
/// `force_cpu` skips detection entirely.
pub fn select_device(force_cpu: bool) -> ComputeDevice {
    if force_cpu || !cfg!(feature = "cuda") {
        return ComputeDevice::Cpu;
    }

    if has_nvidia_gpu() {
        tracing::info!("NVIDIA GPU detected, using CUDA backend");
        ComputeDevice::Cuda
    } else {
        tracing::info!("No NVIDIA GPU detected, using CPU backend");
        ComputeDevice::Cpu
    }
}

/// Default device of a backend
pub fn default_device<B: Backend>() -> B::Device {
    B::Device::default()
}

fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        if std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
        {
            return true;
        }
    }

    std::process::Command::new("nvidia-smi")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_cpu() {
        assert_eq!(select_device(true), ComputeDevice::Cpu);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cpu_only_build_never_selects_cuda() {
        assert_eq!(select_device(false), ComputeDevice::Cpu);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(ComputeDevice::Cuda.to_string(), "CUDA (GPU)");
    }
}
