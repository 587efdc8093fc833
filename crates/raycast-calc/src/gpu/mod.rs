//! wgpu backend.
//!
//! A wgpu device exposes a single in-order queue, so event dependencies
//! between commands of the same device are satisfied by submission order.

mod context;
mod pipeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wgpu::util::DeviceExt;

pub use context::GpuContext;
pub(crate) use context::{check_adapter, describe, enumerate_adapters};
pub(crate) use pipeline::GpuKernel;

use crate::buffer::{Buffer, BufferHandle};
use crate::device::{check_queue, check_range, Device};
use crate::error::{CalcError, Result};
use crate::event::Event;
use crate::executable::{
    BoundArg, BuildOptions, CompiledKernel, Executable, Function, KernelCode, ProgramSource,
};
use crate::types::{BufferType, DeviceInfo};

/// Largest workgroup count along one dispatch dimension.
const MAX_GROUPS_PER_DIM: usize = 65535;

/// Completion flag set by `on_submitted_work_done`.
#[derive(Clone)]
pub(crate) struct GpuSignal {
    done: Arc<AtomicBool>,
    device: Arc<wgpu::Device>,
}

impl GpuSignal {
    pub(crate) fn wait(&self) -> Result<()> {
        while !self.done.load(Ordering::Acquire) {
            self.device.poll(wgpu::Maintain::Wait);
        }
        Ok(())
    }

    pub(crate) fn wait_for(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.device.poll(wgpu::Maintain::Poll);
            if self.done.load(Ordering::Acquire) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::yield_now();
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.device.poll(wgpu::Maintain::Poll);
        self.done.load(Ordering::Acquire)
    }
}

/// Compute device backed by a wgpu adapter.
pub struct GpuDevice {
    info: DeviceInfo,
    ctx: GpuContext,
}

impl GpuDevice {
    pub(crate) fn new(adapter: &wgpu::Adapter) -> Result<Self> {
        check_adapter(adapter)?;
        let info = describe(adapter);
        let ctx = GpuContext::new_blocking(adapter)?;
        tracing::info!(name = %info.name, vendor = %info.vendor, "created wgpu device");
        Ok(Self { info, ctx })
    }

    /// Underlying wgpu context.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Event that completes once everything submitted so far is done.
    fn submitted_event(&self) -> Event {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        self.ctx
            .queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));
        Event::from_gpu(GpuSignal {
            done,
            device: self.ctx.device.clone(),
        })
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) -> Event {
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.submitted_event()
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

fn gpu_buffer(buffer: &Buffer) -> Result<&Arc<wgpu::Buffer>> {
    match &buffer.handle {
        BufferHandle::Gpu(b) => Ok(b),
        _ => Err(CalcError::logic("buffer belongs to another device")),
    }
}

fn check_words(len: usize) -> Result<()> {
    if len % 4 != 0 {
        return Err(CalcError::logic(format!(
            "transfer of {len} bytes is not a whole number of words"
        )));
    }
    Ok(())
}

impl Device for GpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_buffer(
        &self,
        size: usize,
        buffer_type: BufferType,
        init: Option<&[u8]>,
    ) -> Result<Buffer> {
        if size > self.info.max_alloc_size {
            return Err(CalcError::OutOfMemory { requested: size });
        }
        // Zero-sized bindings are invalid; round up to a whole word.
        let padded = size.max(4).next_multiple_of(4);
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let buffer = match init {
            Some(data) => {
                let mut contents = vec![0u8; padded];
                let n = data.len().min(size);
                contents[..n].copy_from_slice(&data[..n]);
                self.ctx
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: None,
                        contents: &contents,
                        usage,
                    })
            }
            None => self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size: padded as u64,
                usage,
                mapped_at_creation: false,
            }),
        };
        Ok(Buffer::new(BufferHandle::Gpu(Arc::new(buffer)), size, buffer_type))
    }

    fn read_buffer(
        &self,
        buffer: &Buffer,
        queue: u32,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<()> {
        check_queue(&self.info, queue)?;
        check_range(buffer, offset, dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        let src = gpu_buffer(buffer)?;
        let size = dst.len().next_multiple_of(4);
        let staging = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: size as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        // The padded tail stays inside the padded source allocation.
        let mut encoder = self.encoder("readback");
        encoder.copy_buffer_to_buffer(src, offset as u64, &staging, 0, size as u64);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| CalcError::BufferMapping)?
            .map_err(|_| CalcError::BufferMapping)?;

        let data = slice.get_mapped_range();
        dst.copy_from_slice(&data[..dst.len()]);
        drop(data);
        staging.unmap();
        Ok(())
    }

    fn write_buffer(
        &self,
        buffer: &Buffer,
        queue: u32,
        offset: usize,
        src: &[u8],
    ) -> Result<Event> {
        check_queue(&self.info, queue)?;
        check_range(buffer, offset, src.len())?;
        check_words(src.len())?;
        let dst = gpu_buffer(buffer)?;
        self.ctx.queue.write_buffer(dst, offset as u64, src);
        self.ctx.queue.submit(std::iter::empty());
        Ok(self.submitted_event())
    }

    fn copy_buffer(
        &self,
        src: &Buffer,
        dst: &Buffer,
        queue: u32,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) -> Result<Event> {
        check_queue(&self.info, queue)?;
        check_range(src, src_offset, size)?;
        check_range(dst, dst_offset, size)?;
        check_words(size)?;
        let mut encoder = self.encoder("copy");
        encoder.copy_buffer_to_buffer(
            gpu_buffer(src)?,
            src_offset as u64,
            gpu_buffer(dst)?,
            dst_offset as u64,
            size as u64,
        );
        Ok(self.submit(encoder))
    }

    #[tracing::instrument(skip_all, fields(program = %source.name, kernels = source.kernels.len()))]
    fn compile_executable(
        &self,
        source: &ProgramSource,
        options: &BuildOptions,
    ) -> Result<Executable> {
        let kernels = source
            .kernels
            .iter()
            .map(|kernel| {
                let wgsl = source.module_source(kernel, options);
                let code = GpuKernel::compile(&self.ctx.device, &source.name, kernel, &wgsl)?;
                Ok(CompiledKernel {
                    name: kernel.name.clone(),
                    args: kernel.args.clone(),
                    code: KernelCode::Gpu(code),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("compiled wgpu program");
        Ok(Executable::new(source.name.clone(), kernels))
    }

    fn execute(
        &self,
        function: &Function,
        queue: u32,
        global: usize,
        local: usize,
        _deps: &[Event],
    ) -> Result<Event> {
        check_queue(&self.info, queue)?;
        let kernel = match &function.kernel.code {
            KernelCode::Gpu(kernel) => kernel,
            _ => return Err(CalcError::logic("function was compiled for another device")),
        };
        if local == 0 || local > self.info.max_local_size {
            return Err(CalcError::logic(format!("invalid local size {local}")));
        }
        let args = function.bound_args()?;

        let mut buffer_entries = Vec::new();
        let mut scalars: Vec<u32> = Vec::new();
        for (binding, arg) in args.iter().enumerate() {
            match arg {
                BoundArg::Buffer(BufferHandle::Gpu(b)) => buffer_entries.push(wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: b.as_entire_binding(),
                }),
                BoundArg::Buffer(_) => {
                    return Err(CalcError::logic("buffer belongs to another device"))
                }
                BoundArg::U32(v) => scalars.push(*v),
                BoundArg::I32(v) => scalars.push(*v as u32),
                BoundArg::F32(v) => scalars.push(v.to_bits()),
            }
        }

        let buffers_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&function.kernel.name),
            layout: &kernel.buffers_layout,
            entries: &buffer_entries,
        });
        let scalars_group = match &kernel.scalars_layout {
            Some(layout) => {
                // Uniform blocks are sized in 16-byte units.
                scalars.resize(scalars.len().next_multiple_of(4), 0);
                let uniform = self
                    .ctx
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("kernel scalars"),
                        contents: bytemuck::cast_slice(&scalars),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                Some(self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("kernel scalars"),
                    layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform.as_entire_binding(),
                    }],
                }))
            }
            None => None,
        };

        let groups = global.div_ceil(local).max(1);
        let (x, y) = if groups > MAX_GROUPS_PER_DIM {
            (MAX_GROUPS_PER_DIM, groups.div_ceil(MAX_GROUPS_PER_DIM))
        } else {
            (groups, 1)
        };
        if y > MAX_GROUPS_PER_DIM {
            return Err(CalcError::CapacityExceeded {
                what: "dispatch size",
                requested: global,
                limit: MAX_GROUPS_PER_DIM * MAX_GROUPS_PER_DIM * local,
            });
        }

        let mut encoder = self.encoder(&function.kernel.name);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&function.kernel.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &buffers_group, &[]);
            if let Some(group) = &scalars_group {
                pass.set_bind_group(1, group, &[]);
            }
            pass.dispatch_workgroups(x as u32, y as u32, 1);
        }
        Ok(self.submit(encoder))
    }

    fn flush(&self, queue: u32) -> Result<()> {
        check_queue(&self.info, queue)?;
        self.ctx.queue.submit(std::iter::empty());
        Ok(())
    }

    fn finish(&self, queue: u32) -> Result<()> {
        check_queue(&self.info, queue)?;
        self.ctx.queue.submit(std::iter::empty());
        self.submitted_event().wait()
    }
}
