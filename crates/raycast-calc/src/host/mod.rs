//! CPU backend.
//!
//! Kernels run as native functions, one call per workgroup, spread over a
//! bounded rayon pool. Each command queue is a dedicated worker thread so
//! that submission never blocks the caller.

mod buffer;
mod kernel;
mod queue;

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;

pub use buffer::HostBuffer;
pub use kernel::{HostKernel, WorkGroup};

use crate::buffer::{Buffer, BufferHandle};
use crate::device::{check_queue, check_range, Device};
use crate::error::{CalcError, Result};
use crate::event::Event;
use crate::executable::{
    BoundArg, BuildOptions, CompiledKernel, Executable, Function, KernelCode, ProgramSource,
};
use crate::types::{BufferType, DeviceInfo, DeviceType, Platform};
use kernel::HostArg;
use queue::HostQueue;

/// Host device settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Kernel worker threads; 0 uses the available parallelism.
    pub num_threads: usize,
    /// Number of command queues.
    pub num_queues: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            num_queues: 2,
        }
    }
}

/// Largest single host allocation.
const MAX_ALLOC_SIZE: usize = 1 << 32;

/// Largest host workgroup.
const MAX_LOCAL_SIZE: usize = 1024;

/// Compute device running kernels on the host CPU.
pub struct HostDevice {
    info: DeviceInfo,
    pool: Arc<ThreadPool>,
    queues: Vec<HostQueue>,
}

impl HostDevice {
    /// Description of the host device without creating it.
    pub fn describe(config: &HostConfig) -> DeviceInfo {
        DeviceInfo {
            name: "Host CPU".to_string(),
            vendor: "host".to_string(),
            device_type: DeviceType::Cpu,
            platform: Platform::Host,
            max_alloc_size: MAX_ALLOC_SIZE,
            max_local_size: MAX_LOCAL_SIZE,
            num_queues: config.num_queues.max(1),
        }
    }

    /// Create a host device.
    pub fn new(config: &HostConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("raycast-host-{i}"))
            .build()
            .map_err(|e| CalcError::Backend {
                status: -1,
                message: format!("failed to build thread pool: {e}"),
            })?;
        let info = Self::describe(config);
        let queues = (0..info.num_queues)
            .map(HostQueue::spawn)
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            threads = pool.current_num_threads(),
            queues = info.num_queues,
            "created host device"
        );
        Ok(Self {
            info,
            pool: Arc::new(pool),
            queues,
        })
    }

    fn queue(&self, queue: u32) -> Result<&HostQueue> {
        check_queue(&self.info, queue)?;
        Ok(&self.queues[queue as usize])
    }
}

fn host_buffer(buffer: &Buffer) -> Result<Arc<HostBuffer>> {
    match &buffer.handle {
        BufferHandle::Host(b) => Ok(b.clone()),
        #[cfg(feature = "gpu")]
        _ => Err(CalcError::logic("buffer belongs to another device")),
    }
}

impl Device for HostDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_buffer(
        &self,
        size: usize,
        buffer_type: BufferType,
        init: Option<&[u8]>,
    ) -> Result<Buffer> {
        if size > MAX_ALLOC_SIZE {
            return Err(CalcError::OutOfMemory { requested: size });
        }
        let storage = HostBuffer::new(size, init)?;
        Ok(Buffer::new(BufferHandle::Host(Arc::new(storage)), size, buffer_type))
    }

    fn read_buffer(
        &self,
        buffer: &Buffer,
        queue: u32,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<()> {
        check_range(buffer, offset, dst.len())?;
        let src = host_buffer(buffer)?;
        let staging = Arc::new(parking_lot::Mutex::new(vec![0u8; dst.len()]));
        let out = staging.clone();
        self.queue(queue)?
            .submit(&[], move || {
                src.read_bytes(offset, &mut out.lock());
                Ok(())
            })?
            .wait()?;
        dst.copy_from_slice(&staging.lock());
        Ok(())
    }

    fn write_buffer(
        &self,
        buffer: &Buffer,
        queue: u32,
        offset: usize,
        src: &[u8],
    ) -> Result<Event> {
        check_range(buffer, offset, src.len())?;
        let dst = host_buffer(buffer)?;
        let data = src.to_vec();
        self.queue(queue)?.submit(&[], move || {
            dst.write_bytes(offset, &data);
            Ok(())
        })
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
        check_range(src, src_offset, size)?;
        check_range(dst, dst_offset, size)?;
        let (from, to) = (host_buffer(src)?, host_buffer(dst)?);
        self.queue(queue)?.submit(&[], move || {
            to.copy_from(&from, src_offset, dst_offset, size);
            Ok(())
        })
    }

    #[tracing::instrument(skip_all, fields(program = %source.name, kernels = source.kernels.len()))]
    fn compile_executable(
        &self,
        source: &ProgramSource,
        _options: &BuildOptions,
    ) -> Result<Executable> {
        let kernels = source
            .kernels
            .iter()
            .map(|k| CompiledKernel {
                name: k.name.clone(),
                args: k.args.clone(),
                code: KernelCode::Host(k.host),
            })
            .collect();
        Ok(Executable::new(source.name.clone(), kernels))
    }

    fn execute(
        &self,
        function: &Function,
        queue: u32,
        global: usize,
        local: usize,
        deps: &[Event],
    ) -> Result<Event> {
        let kernel = match function.kernel.code {
            KernelCode::Host(kernel) => kernel,
            #[cfg(feature = "gpu")]
            _ => return Err(CalcError::logic("function was compiled for another device")),
        };
        if local == 0 || local > MAX_LOCAL_SIZE {
            return Err(CalcError::logic(format!("invalid local size {local}")));
        }
        let args = function
            .bound_args()?
            .into_iter()
            .map(|arg| match arg {
                BoundArg::Buffer(BufferHandle::Host(b)) => Ok(HostArg::Buffer(b)),
                #[cfg(feature = "gpu")]
                BoundArg::Buffer(_) => Err(CalcError::logic("buffer belongs to another device")),
                BoundArg::U32(v) => Ok(HostArg::U32(v)),
                BoundArg::I32(v) => Ok(HostArg::I32(v)),
                BoundArg::F32(v) => Ok(HostArg::F32(v)),
            })
            .collect::<Result<Vec<_>>>()?;

        let num_groups = global.div_ceil(local);
        let pool = self.pool.clone();
        self.queue(queue)?.submit(deps, move || {
            pool.install(|| {
                (0..num_groups).into_par_iter().for_each(|group_id| {
                    kernel(&WorkGroup {
                        group_id,
                        local_size: local,
                        num_groups,
                        args: &args,
                    })
                })
            });
            Ok(())
        })
    }

    fn flush(&self, queue: u32) -> Result<()> {
        check_queue(&self.info, queue)
    }

    fn finish(&self, queue: u32) -> Result<()> {
        self.queue(queue)?.submit(&[], || Ok(()))?.wait()
    }
}

impl std::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDevice").field("info", &self.info).finish()
    }
}
