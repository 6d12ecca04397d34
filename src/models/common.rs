// Common model utilities and types

use anyhow::{Context, Result};
use candle_core::{DType, Device};

use crate::config::ExecutionTarget;

/// Device and precision chosen once at process start.
#[derive(Debug, Clone)]
pub struct DevicePolicy {
    pub device: Device,
    /// Precision for frozen base weights; adapters always train in f32
    pub dtype: DType,
}

impl DevicePolicy {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
        }
    }

    /// Probe hardware for the requested target.
    ///
    /// `Auto` tries CUDA, then Metal, then falls back to CPU. Accelerators run
    /// the base model in f16, CPU in f32.
    pub fn detect(target: ExecutionTarget) -> Result<Self> {
        let policy = match target {
            ExecutionTarget::Cpu => Self::cpu(),
            ExecutionTarget::Cuda => Self::half(
                Device::new_cuda(0).context("Failed to initialize CUDA device")?,
            ),
            ExecutionTarget::Metal => Self::half(
                Device::new_metal(0).context("Failed to initialize Metal device")?,
            ),
            ExecutionTarget::Auto => Self::probe_auto(),
        };

        tracing::info!(
            "Device: {} ({:?})",
            device_name(&policy.device),
            policy.dtype
        );
        Ok(policy)
    }

    fn probe_auto() -> Self {
        if candle_core::utils::cuda_is_available() {
            if let Ok(device) = Device::new_cuda(0) {
                return Self::half(device);
            }
        }

        #[cfg(target_os = "macos")]
        {
            // Apple Silicon
            if candle_core::utils::metal_is_available() {
                if let Ok(device) = Device::new_metal(0) {
                    return Self::half(device);
                }
            }
        }

        Self::cpu()
    }

    fn half(device: Device) -> Self {
        Self {
            device,
            dtype: DType::F16,
        }
    }

    pub fn is_accelerator(&self) -> bool {
        !self.device.is_cpu()
    }
}

pub fn device_name(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_cpu() -> Result<()> {
        let policy = DevicePolicy::detect(ExecutionTarget::Cpu)?;
        assert!(policy.device.is_cpu());
        assert_eq!(policy.dtype, DType::F32);
        assert!(!policy.is_accelerator());
        assert_eq!(device_name(&policy.device), "cpu");
        Ok(())
    }
}
