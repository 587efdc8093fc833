//! Error types for compute device operations.

use thiserror::Error;

/// Status code reported when a host kernel panics during execution.
pub const STATUS_KERNEL_PANIC: i32 = -9999;

/// Status code reported when a dependency of a queued command failed.
pub const STATUS_DEPENDENCY_FAILED: i32 = -9998;

/// Errors that can occur during device operations.
#[derive(Debug, Error)]
pub enum CalcError {
    /// A backend call returned a non-success status.
    #[error("backend call failed (status {status}): {message}")]
    Backend {
        /// Native status code, or one of the `STATUS_*` constants.
        status: i32,
        /// Human-readable description.
        message: String,
    },

    /// Kernel program failed to compile. Carries the full build log.
    #[error("failed to compile program `{program}`:\n{log}")]
    Compile {
        /// Program name.
        program: String,
        /// Compiler output.
        log: String,
    },

    /// The device lacks a capability required by the request.
    #[error("capability mismatch: {0}")]
    Capability(String),

    /// A request exceeded a fixed capacity.
    #[error("{what} exceeds capacity: requested {requested}, limit {limit}")]
    CapacityExceeded {
        /// What was requested.
        what: &'static str,
        /// Requested amount.
        requested: usize,
        /// Hard limit.
        limit: usize,
    },

    /// Device memory could not be allocated.
    #[error("out of device memory allocating {requested} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        requested: usize,
    },

    /// No device exists at the given index.
    #[error("no device at index {0}")]
    InvalidDevice(usize),

    /// The call was made with invalid arguments or in an invalid state.
    #[error("logic error: {0}")]
    Logic(String),

    /// No compatible GPU adapter found.
    #[cfg(feature = "gpu")]
    #[error("No compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[cfg(feature = "gpu")]
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Buffer mapping failed.
    #[cfg(feature = "gpu")]
    #[error("Buffer mapping failed")]
    BufferMapping,
}

impl CalcError {
    pub(crate) fn logic(message: impl Into<String>) -> Self {
        CalcError::Logic(message.into())
    }
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, CalcError>;
