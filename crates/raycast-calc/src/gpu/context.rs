//! wgpu adapter enumeration and device creation.

use std::sync::Arc;

use wgpu::{Adapter, Instance};

use crate::error::{CalcError, Result};
use crate::types::{DeviceInfo, DeviceType, Platform};

/// Device and queue created from one adapter.
pub struct GpuContext {
    /// The wgpu device for creating resources and pipelines.
    pub device: Arc<wgpu::Device>,
    /// The command queue for submitting work.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Request a device from `adapter` with the adapter's full limits.
    pub async fn new(adapter: &Adapter) -> Result<Self> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("raycast"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;
        Ok(Self {
            device: Arc::new(device),
            queue,
        })
    }

    /// Initialize synchronously.
    pub fn new_blocking(adapter: &Adapter) -> Result<Self> {
        pollster::block_on(Self::new(adapter))
    }
}

/// All compute-capable adapters on this machine.
pub(crate) fn enumerate_adapters() -> Vec<Adapter> {
    let instance = Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .filter(|adapter| {
            adapter
                .get_downlevel_capabilities()
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        })
        .collect()
}

/// Describe an adapter without creating a device on it.
pub(crate) fn describe(adapter: &Adapter) -> DeviceInfo {
    let info = adapter.get_info();
    let limits = adapter.limits();
    let device_type = match info.device_type {
        wgpu::DeviceType::DiscreteGpu
        | wgpu::DeviceType::IntegratedGpu
        | wgpu::DeviceType::VirtualGpu => DeviceType::Gpu,
        wgpu::DeviceType::Cpu => DeviceType::Cpu,
        wgpu::DeviceType::Other => DeviceType::Accelerator,
    };
    DeviceInfo {
        name: info.name,
        vendor: format!("{:#06x} ({:?})", info.vendor, info.backend),
        device_type,
        platform: Platform::Wgpu,
        max_alloc_size: limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64) as usize,
        max_local_size: limits.max_compute_invocations_per_workgroup as usize,
        num_queues: 1,
    }
}

/// Fail early when an adapter cannot run storage-buffer kernels.
pub(crate) fn check_adapter(adapter: &Adapter) -> Result<()> {
    let limits = adapter.limits();
    if limits.max_storage_buffers_per_shader_stage < 8 {
        return Err(CalcError::Capability(format!(
            "adapter supports only {} storage buffers per stage",
            limits.max_storage_buffers_per_shader_stage
        )));
    }
    Ok(())
}
