//! Compute pipeline creation for one kernel.

use crate::error::{CalcError, Result};
use crate::executable::{ArgKind, KernelSource};

/// A compiled kernel with explicit bind group layouts.
pub(crate) struct GpuKernel {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) buffers_layout: wgpu::BindGroupLayout,
    pub(crate) scalars_layout: Option<wgpu::BindGroupLayout>,
}

fn buffer_layout_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuKernel {
    pub(crate) fn compile(
        device: &wgpu::Device,
        program: &str,
        kernel: &KernelSource,
        wgsl: &str,
    ) -> Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&kernel.name),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        });

        let entries: Vec<_> = kernel
            .args
            .iter()
            .enumerate()
            .filter_map(|(binding, kind)| match kind {
                ArgKind::ReadBuffer => Some(buffer_layout_entry(binding as u32, true)),
                ArgKind::RwBuffer => Some(buffer_layout_entry(binding as u32, false)),
                ArgKind::Scalar => None,
            })
            .collect();
        let buffers_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&kernel.name),
            entries: &entries,
        });

        let scalars_layout = kernel.args.contains(&ArgKind::Scalar).then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("kernel scalars"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
        });

        let mut layouts = vec![&buffers_layout];
        if let Some(layout) = &scalars_layout {
            layouts.push(layout);
        }
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&kernel.name),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&kernel.name),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(&kernel.name),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(CalcError::Compile {
                program: format!("{program}::{}", kernel.name),
                log: error.to_string(),
            });
        }

        Ok(Self {
            pipeline,
            buffers_layout,
            scalars_layout,
        })
    }
}
