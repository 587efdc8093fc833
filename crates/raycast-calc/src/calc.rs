//! Device enumeration.

use std::sync::Arc;

use crate::device::Device;
use crate::error::{CalcError, Result};
use crate::host::{HostConfig, HostDevice};
use crate::types::DeviceInfo;

/// Device enumeration settings.
#[derive(Debug, Clone)]
pub struct CalcConfig {
    /// Probe wgpu adapters in addition to the host device.
    pub enable_gpu: bool,
    /// Host device settings.
    pub host: HostConfig,
}

impl Default for CalcConfig {
    fn default() -> Self {
        Self {
            enable_gpu: true,
            host: HostConfig::default(),
        }
    }
}

enum Candidate {
    Host,
    #[cfg(feature = "gpu")]
    Wgpu(wgpu::Adapter),
}

/// Entry point: lists the available devices and creates them.
///
/// Device 0 is always the host device. wgpu adapters follow when the `gpu`
/// feature is enabled and `enable_gpu` is set.
pub struct Calc {
    config: CalcConfig,
    candidates: Vec<(Candidate, DeviceInfo)>,
}

impl Calc {
    /// Enumerate devices.
    #[tracing::instrument(skip_all)]
    pub fn new(config: CalcConfig) -> Self {
        let candidates = vec![(Candidate::Host, HostDevice::describe(&config.host))];

        #[cfg(feature = "gpu")]
        let candidates = {
            let mut candidates = candidates;
            if config.enable_gpu {
                for adapter in crate::gpu::enumerate_adapters() {
                    let info = crate::gpu::describe(&adapter);
                    candidates.push((Candidate::Wgpu(adapter), info));
                }
            }
            candidates
        };

        tracing::debug!(devices = candidates.len(), "enumerated compute devices");
        Self { config, candidates }
    }

    /// Number of available devices.
    pub fn device_count(&self) -> usize {
        self.candidates.len()
    }

    /// Description of device `index`.
    pub fn device_info(&self, index: usize) -> Result<&DeviceInfo> {
        self.candidates
            .get(index)
            .map(|(_, info)| info)
            .ok_or(CalcError::InvalidDevice(index))
    }

    /// Create device `index`.
    pub fn create_device(&self, index: usize) -> Result<Arc<dyn Device>> {
        let (candidate, _) = self.candidates.get(index).ok_or(CalcError::InvalidDevice(index))?;
        match candidate {
            Candidate::Host => Ok(Arc::new(HostDevice::new(&self.config.host)?)),
            #[cfg(feature = "gpu")]
            Candidate::Wgpu(adapter) => Ok(Arc::new(crate::gpu::GpuDevice::new(adapter)?)),
        }
    }
}

impl Default for Calc {
    fn default() -> Self {
        Self::new(CalcConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_is_first_device() {
        let calc = Calc::new(CalcConfig {
            enable_gpu: false,
            ..Default::default()
        });
        assert_eq!(calc.device_count(), 1);
        assert_eq!(calc.device_info(0).unwrap().platform, crate::Platform::Host);
        assert!(matches!(calc.device_info(3), Err(CalcError::InvalidDevice(3))));
        assert!(matches!(calc.create_device(1), Err(CalcError::InvalidDevice(1))));
    }
}
