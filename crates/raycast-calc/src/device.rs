//! The compute device interface.

use bytemuck::Pod;

use crate::buffer::{Buffer, Mapping};
use crate::error::{CalcError, Result};
use crate::event::Event;
use crate::executable::{BuildOptions, Executable, Function, ProgramSource};
use crate::types::{BufferType, DeviceInfo, MapType};

/// A compute device with one or more in-order command queues.
///
/// Commands submitted to the same queue execute in submission order.
/// Ordering across queues is expressed with event dependencies.
pub trait Device: Send + Sync {
    /// Static description of the device.
    fn info(&self) -> &DeviceInfo;

    /// Number of command queues.
    fn num_queues(&self) -> u32 {
        self.info().num_queues
    }

    /// Allocate `size` bytes, optionally initialised from `init`.
    fn create_buffer(
        &self,
        size: usize,
        buffer_type: BufferType,
        init: Option<&[u8]>,
    ) -> Result<Buffer>;

    /// Blocking read of `dst.len()` bytes at `offset`, ordered after all work
    /// previously submitted to `queue`.
    fn read_buffer(&self, buffer: &Buffer, queue: u32, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Queue a write of `src` at `offset`. The source is copied before return.
    fn write_buffer(&self, buffer: &Buffer, queue: u32, offset: usize, src: &[u8]) -> Result<Event>;

    /// Queue a device-side copy.
    fn copy_buffer(
        &self,
        src: &Buffer,
        dst: &Buffer,
        queue: u32,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) -> Result<Event>;

    /// Map `size` bytes at `offset` for host access.
    ///
    /// The mapping is filled with the current device contents before
    /// return, so the returned event is already complete.
    fn map_buffer(
        &self,
        buffer: &Buffer,
        queue: u32,
        offset: usize,
        size: usize,
        map_type: MapType,
    ) -> Result<(Mapping, Event)> {
        let mut data = vec![0u8; size];
        self.read_buffer(buffer, queue, offset, &mut data)?;
        Ok((
            Mapping {
                data,
                offset,
                map_type,
            },
            Event::complete(),
        ))
    }

    /// Release a mapping, uploading its contents for write mappings.
    fn unmap_buffer(&self, buffer: &Buffer, queue: u32, mapping: Mapping) -> Result<Event> {
        match mapping.map_type {
            MapType::Read => Ok(Event::complete()),
            MapType::Write => self.write_buffer(buffer, queue, mapping.offset, &mapping.data),
        }
    }

    /// Compile every kernel of `source`.
    fn compile_executable(
        &self,
        source: &ProgramSource,
        options: &BuildOptions,
    ) -> Result<Executable>;

    /// Queue `function` over `global` lanes in workgroups of `local` lanes.
    ///
    /// `global` is rounded up to a whole number of workgroups. The command
    /// starts only after every event in `deps` has completed.
    fn execute(
        &self,
        function: &Function,
        queue: u32,
        global: usize,
        local: usize,
        deps: &[Event],
    ) -> Result<Event>;

    /// Submit any batched work on `queue`.
    fn flush(&self, queue: u32) -> Result<()>;

    /// Block until all work on `queue` has completed.
    fn finish(&self, queue: u32) -> Result<()>;
}

impl<'a> dyn Device + 'a {
    /// Allocate a buffer holding `data`.
    pub fn create_pod_buffer<T: Pod>(&self, buffer_type: BufferType, data: &[T]) -> Result<Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.create_buffer(bytes.len(), buffer_type, Some(bytes))
    }

    /// Allocate a zeroed buffer of `count` elements of `T`.
    pub fn create_typed_buffer<T: Pod>(
        &self,
        buffer_type: BufferType,
        count: usize,
    ) -> Result<Buffer> {
        let size = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(CalcError::OutOfMemory { requested: usize::MAX })?;
        self.create_buffer(size, buffer_type, None)
    }

    /// Blocking read of `count` elements of `T` starting at element `first`.
    pub fn read_vec<T: Pod>(
        &self,
        buffer: &Buffer,
        queue: u32,
        first: usize,
        count: usize,
    ) -> Result<Vec<T>> {
        let elem = std::mem::size_of::<T>();
        let mut out = vec![T::zeroed(); count];
        self.read_buffer(
            buffer,
            queue,
            first * elem,
            bytemuck::cast_slice_mut(&mut out),
        )?;
        Ok(out)
    }

    /// Queue a write of `data` starting at element `first`.
    pub fn write_slice<T: Pod>(
        &self,
        buffer: &Buffer,
        queue: u32,
        first: usize,
        data: &[T],
    ) -> Result<Event> {
        self.write_buffer(
            buffer,
            queue,
            first * std::mem::size_of::<T>(),
            bytemuck::cast_slice(data),
        )
    }
}

/// Shared range and queue validation for backends.
pub(crate) fn check_range(buffer: &Buffer, offset: usize, len: usize) -> Result<()> {
    if offset % 4 != 0 {
        return Err(CalcError::logic(format!("offset {offset} is not 4-byte aligned")));
    }
    match offset.checked_add(len) {
        Some(end) if end <= buffer.size() => Ok(()),
        _ => Err(CalcError::logic(format!(
            "range {offset}+{len} exceeds buffer of {} bytes",
            buffer.size()
        ))),
    }
}

pub(crate) fn check_queue(info: &DeviceInfo, queue: u32) -> Result<()> {
    if queue >= info.num_queues {
        return Err(CalcError::logic(format!(
            "queue {queue} out of range, device has {}",
            info.num_queues
        )));
    }
    Ok(())
}
