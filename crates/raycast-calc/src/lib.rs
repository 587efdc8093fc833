#![warn(missing_docs)]

//! Compute device abstraction for raycast.
//!
//! Kernels are described once as a [`ProgramSource`] holding both WGSL text
//! and a native host implementation. A [`Device`] compiles the program for
//! its backend and runs the kernels on in-order command queues:
//!
//! - the host device runs native kernels on a rayon pool and is always
//!   available
//! - wgpu devices (feature `gpu`) run the WGSL kernels
//!
//! # Example
//!
//! ```
//! use raycast_calc::{BufferType, Calc, CalcConfig};
//!
//! let calc = Calc::new(CalcConfig { enable_gpu: false, ..Default::default() });
//! let device = calc.create_device(0).unwrap();
//! let buffer = device.create_pod_buffer(BufferType::ReadWrite, &[1u32, 2, 3]).unwrap();
//! assert_eq!(device.read_vec::<u32>(&buffer, 0, 0, 3).unwrap(), vec![1, 2, 3]);
//! ```

mod buffer;
mod calc;
mod device;
mod error;
mod event;
mod executable;
pub mod host;
mod types;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use buffer::{Buffer, Mapping};
pub use calc::{Calc, CalcConfig};
pub use device::Device;
pub use error::{CalcError, Result, STATUS_DEPENDENCY_FAILED, STATUS_KERNEL_PANIC};
pub use event::Event;
pub use executable::{ArgKind, BuildOptions, Executable, Function, KernelSource, ProgramSource};
pub use host::{HostBuffer, HostConfig, HostDevice, HostKernel, WorkGroup};
pub use types::{BufferType, DeviceInfo, DeviceType, MapType, Platform};
