//! Error types for acceleration structure build and queries.

use raycast_calc::CalcError;
use thiserror::Error;

/// Errors that can occur while building or querying a world.
#[derive(Debug, Error)]
pub enum Error {
    /// A device operation failed.
    #[error(transparent)]
    Calc(#[from] CalcError),

    /// A query was issued before the world was preprocessed.
    #[error("query issued before preprocess")]
    NotPreprocessed,

    /// A batch or scene exceeded a fixed capacity.
    #[error("{what} exceeds capacity: requested {requested}, limit {limit}")]
    CapacityExceeded {
        /// What was requested.
        what: &'static str,
        /// Requested amount.
        requested: usize,
        /// Hard limit.
        limit: usize,
    },

    /// A shape handle does not refer to a live shape.
    #[error("unknown shape")]
    UnknownShape,

    /// Mesh input data is inconsistent.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// An option has an unknown name or a value of the wrong kind.
    #[error("invalid option `{name}`: {reason}")]
    InvalidOption {
        /// Option name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A tree is deeper than the traversal can represent.
    #[error("{strategy} supports trees up to depth {limit}, got {depth}")]
    DepthExceeded {
        /// Traversal strategy name.
        strategy: &'static str,
        /// Depth of the built tree.
        depth: usize,
        /// Maximum supported depth.
        limit: usize,
    },

    /// Options document failed to parse.
    #[error("failed to parse options: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for raycast kernel operations.
pub type Result<T> = std::result::Result<T, Error>;
