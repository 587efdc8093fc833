//! Device buffers and host mappings.

use std::sync::Arc;

use bytemuck::Pod;

use crate::host::HostBuffer;
use crate::types::{BufferType, MapType};

/// Backend storage behind a [`Buffer`].
#[derive(Debug, Clone)]
pub(crate) enum BufferHandle {
    Host(Arc<HostBuffer>),
    #[cfg(feature = "gpu")]
    Gpu(Arc<wgpu::Buffer>),
}

/// A block of device memory.
///
/// Buffers are move-only; the memory is released when the last owner (the
/// buffer itself or a function argument binding it) is dropped.
#[derive(Debug)]
pub struct Buffer {
    pub(crate) handle: BufferHandle,
    size: usize,
    buffer_type: BufferType,
}

impl Buffer {
    pub(crate) fn new(handle: BufferHandle, size: usize, buffer_type: BufferType) -> Self {
        Self {
            handle,
            size,
            buffer_type,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Access type the buffer was created with.
    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    /// Number of whole `T` elements the buffer holds.
    pub fn len_of<T>(&self) -> usize {
        self.size / std::mem::size_of::<T>().max(1)
    }

    /// Whether the two buffers refer to the same memory.
    pub fn same_memory(&self, other: &Buffer) -> bool {
        match (&self.handle, &other.handle) {
            (BufferHandle::Host(a), BufferHandle::Host(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "gpu")]
            (BufferHandle::Gpu(a), BufferHandle::Gpu(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "gpu")]
            _ => false,
        }
    }
}

/// Host-visible copy of a mapped buffer range.
///
/// Read mappings hold the device contents at map time. Write mappings are
/// uploaded back to the device when passed to `unmap_buffer`.
#[derive(Debug)]
pub struct Mapping {
    pub(crate) data: Vec<u8>,
    pub(crate) offset: usize,
    pub(crate) map_type: MapType,
}

impl Mapping {
    /// Byte offset of the mapped range.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Access requested when mapping.
    pub fn map_type(&self) -> MapType {
        self.map_type
    }

    /// Mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable mapped bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy the mapped range out as `T` elements.
    ///
    /// A trailing partial element is dropped.
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        let elem = std::mem::size_of::<T>().max(1);
        let mut out = vec![T::zeroed(); self.data.len() / elem];
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        let n = bytes.len();
        bytes.copy_from_slice(&self.data[..n]);
        out
    }

    /// Overwrite the start of the mapped range with `values`.
    pub fn write<T: Pod>(&mut self, values: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_to_vec_drops_partial_element() {
        let mut data = bytemuck::cast_slice::<i32, u8>(&[3, -1]).to_vec();
        data.push(0xff);
        let mapping = Mapping {
            data,
            offset: 0,
            map_type: MapType::Read,
        };
        assert_eq!(mapping.to_vec::<i32>(), vec![3, -1]);
        assert_eq!(mapping.to_vec::<u8>().len(), 9);
    }
}
