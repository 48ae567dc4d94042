//! Compute device resolution for ONNX Runtime sessions.

use muse_settings::Device;
use serde::Serialize;

use crate::types::{ClassifierError, Result};

/// Accelerator found on this host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AcceleratorInfo {
    /// Whether a GPU execution provider can be used.
    pub available: bool,
    /// Execution provider name, e.g. `"cuda"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Number of visible CUDA devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_count: Option<u32>,
    /// Name of device 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Framebuffer memory in use on device 0, MiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_mb: Option<u64>,
    /// Framebuffer memory installed on device 0, MiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_total_mb: Option<u64>,
}

impl AcceleratorInfo {
    /// No accelerator.
    pub fn none() -> Self {
        Self::default()
    }

    /// CUDA execution provider available.
    pub fn cuda() -> Self {
        Self {
            available: true,
            provider: Some("cuda".into()),
            ..Self::default()
        }
    }

    /// Record device 0 memory from raw byte counts.
    #[must_use]
    pub fn with_memory(mut self, used_bytes: u64, total_bytes: u64) -> Self {
        self.memory_used_mb = Some(used_bytes / MIB);
        self.memory_total_mb = Some(total_bytes / MIB);
        self
    }

    /// Refresh device count, name and memory from the driver.
    ///
    /// A no-op when no accelerator is available or the query fails; the
    /// stats fields are then left empty.
    #[must_use]
    pub fn with_device_stats(self) -> Self {
        if self.available {
            query_device_stats(self)
        } else {
            self
        }
    }
}

const MIB: u64 = 1024 * 1024;

#[cfg(feature = "cuda")]
fn query_device_stats(mut info: AcceleratorInfo) -> AcceleratorInfo {
    use nvml_wrapper::Nvml;

    let nvml = match Nvml::init() {
        Ok(nvml) => nvml,
        Err(e) => {
            tracing::debug!(error = %e, "NVML unavailable; skipping device stats");
            return info;
        }
    };
    info.device_count = nvml.device_count().ok();
    let device = match nvml.device_by_index(0) {
        Ok(device) => device,
        Err(e) => {
            tracing::debug!(error = %e, "NVML device 0 unavailable");
            return info;
        }
    };
    info.device_name = device.name().ok();
    match device.memory_info() {
        Ok(mem) => info.with_memory(mem.used, mem.total),
        Err(_) => info,
    }
}

#[cfg(not(feature = "cuda"))]
fn query_device_stats(info: AcceleratorInfo) -> AcceleratorInfo {
    info
}

/// Device a session actually runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedDevice {
    /// CPU execution provider.
    Cpu,
    /// CUDA execution provider.
    Cuda,
}

impl ResolvedDevice {
    /// Lowercase name for API responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

/// Map the requested device onto what `accelerator` offers.
///
/// `Auto` prefers the accelerator; `Cuda` without one is a load error.
pub fn resolve_device(requested: Device, accelerator: &AcceleratorInfo) -> Result<ResolvedDevice> {
    let has_cuda = accelerator.available && accelerator.provider.as_deref() == Some("cuda");
    match requested {
        Device::Cpu => Ok(ResolvedDevice::Cpu),
        Device::Auto if has_cuda => Ok(ResolvedDevice::Cuda),
        Device::Auto => Ok(ResolvedDevice::Cpu),
        Device::Cuda if has_cuda => Ok(ResolvedDevice::Cuda),
        Device::Cuda => Err(ClassifierError::ModelLoad(
            "device cuda requested but no CUDA execution provider is available".into(),
        )),
    }
}

/// Probe ONNX Runtime for a usable CUDA execution provider.
#[cfg(feature = "cuda")]
pub fn probe_accelerator() -> AcceleratorInfo {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

    match CUDAExecutionProvider::default().is_available() {
        Ok(true) => AcceleratorInfo::cuda(),
        Ok(false) => AcceleratorInfo::none(),
        Err(e) => {
            tracing::warn!(error = %e, "CUDA execution provider probe failed");
            AcceleratorInfo::none()
        }
    }
}

/// Probe ONNX Runtime for a usable CUDA execution provider.
///
/// Always empty in builds without the `cuda` feature.
#[cfg(not(feature = "cuda"))]
pub fn probe_accelerator() -> AcceleratorInfo {
    AcceleratorInfo::none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefers_cuda() {
        let d = resolve_device(Device::Auto, &AcceleratorInfo::cuda()).unwrap();
        assert_eq!(d, ResolvedDevice::Cuda);
    }

    #[test]
    fn auto_falls_back_to_cpu() {
        let d = resolve_device(Device::Auto, &AcceleratorInfo::none()).unwrap();
        assert_eq!(d, ResolvedDevice::Cpu);
    }

    #[test]
    fn cpu_ignores_accelerator() {
        let d = resolve_device(Device::Cpu, &AcceleratorInfo::cuda()).unwrap();
        assert_eq!(d.as_str(), "cpu");
    }

    #[test]
    fn cuda_without_provider_fails() {
        let err = resolve_device(Device::Cuda, &AcceleratorInfo::none()).unwrap_err();
        assert_eq!(err.kind(), "model_load");
    }

    #[test]
    fn accelerator_serializes_without_empty_provider() {
        let json = serde_json::to_value(AcceleratorInfo::none()).unwrap();
        assert_eq!(json, serde_json::json!({"available": false}));
        let json = serde_json::to_value(AcceleratorInfo::cuda()).unwrap();
        assert_eq!(json["provider"], "cuda");
        assert!(json.get("memory_used_mb").is_none());
    }

    #[test]
    fn memory_is_reported_in_mib() {
        let info = AcceleratorInfo::cuda().with_memory(1536 * MIB + 10, 8 * 1024 * MIB);
        assert_eq!(info.memory_used_mb, Some(1536));
        assert_eq!(info.memory_total_mb, Some(8192));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["memory_total_mb"], 8192);
    }

    #[test]
    fn device_stats_skip_missing_accelerator() {
        assert_eq!(AcceleratorInfo::none().with_device_stats(), AcceleratorInfo::none());
    }
}
