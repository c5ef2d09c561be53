//! Error types.
//!
//! Only building the orchestrator can fail. Everything happening per frame
//! degrades gracefully (see `MetadataError`).
use thiserror::Error;

/// Errors returned to the crate's users.
#[derive(Error, Debug)]
pub enum Error {
    /// rayon refused to build the worker pool.
    #[error("building worker pool failed: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    /// Inconsistent builder settings.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a metadata block could not be decoded.
/// Never surfaced: the sample is then processed as having no metadata.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Payload is shorter than its tag requires.
    #[error("truncated metadata: {0}")]
    Io(#[from] std::io::Error),

    /// Block does not start with our magic value.
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    /// Block version is not supported.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    /// Unknown type tag.
    #[error("unknown tag {0}")]
    UnknownTag(u32),
}
