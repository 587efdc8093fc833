//! Device descriptions and buffer flags.

/// Kind of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// Host processor.
    Cpu,
    /// Discrete or integrated GPU.
    Gpu,
    /// Any other accelerator.
    Accelerator,
}

/// Backend family a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// CPU fallback backend running host kernels on a thread pool.
    Host,
    /// wgpu compute backend running WGSL kernels.
    Wgpu,
}

/// Static description of a device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name.
    pub name: String,
    /// Device vendor.
    pub vendor: String,
    /// Device type.
    pub device_type: DeviceType,
    /// Backend platform.
    pub platform: Platform,
    /// Largest single allocation in bytes.
    pub max_alloc_size: usize,
    /// Largest workgroup size.
    pub max_local_size: usize,
    /// Number of independent command queues.
    pub num_queues: u32,
}

/// Intended device access of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    /// Kernels only read the buffer.
    Read,
    /// Kernels only write the buffer.
    Write,
    /// Kernels read and write the buffer.
    ReadWrite,
}

/// Host access requested by a map operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapType {
    /// Host reads the mapped range.
    Read,
    /// Host writes the mapped range; contents are uploaded on unmap.
    Write,
}
