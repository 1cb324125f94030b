//! Engine error taxonomy

use std::path::PathBuf;
use strata_core::{PathError, SnapshotError};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the public engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("working directory is not empty: {0}")]
    WorkingDirectoryNotEmpty(PathBuf),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("case-insensitive path collision: {first:?} vs {second:?}")]
    DuplicatePath { first: String, second: String },

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("cache i/o failure: {context}")]
    CacheIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("another layer step is already open on this session")]
    ConcurrentStep,

    #[error("layer step is already finalized")]
    AlreadyFinalized,

    #[error("session has been disposed")]
    SessionDisposed,

    #[error("layer step has been disposed")]
    StepDisposed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap an I/O error that occurred inside the layer cache
    pub(crate) fn cache_io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::CacheIo { context, source }
    }

    /// Wrap an I/O error from a malformed or truncated archive stream
    pub(crate) fn corrupt(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::CorruptArchive(format!("{}: {}", context, source))
    }
}

impl From<PathError> for EngineError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidPath { path, reason } => Self::InvalidPath { path, reason },
        }
    }
}

impl From<SnapshotError> for EngineError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::DuplicatePath { first, second } => Self::DuplicatePath { first, second },
            SnapshotError::Path(path_err) => path_err.into(),
            SnapshotError::Cancelled => Self::Cancelled,
        }
    }
}
