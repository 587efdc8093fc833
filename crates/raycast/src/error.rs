use raycast_calc::CalcError;
use thiserror::Error;

/// Errors returned by [`IntersectionApi`](crate::IntersectionApi).
#[derive(Debug, Error)]
pub enum Error {
    /// Building or querying the acceleration structure failed.
    #[error(transparent)]
    Kernel(#[from] raycast_kernel::Error),

    /// A device call failed.
    #[error(transparent)]
    Calc(#[from] CalcError),

    /// The configuration document is malformed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for the raycast API.
pub type Result<T> = std::result::Result<T, Error>;
