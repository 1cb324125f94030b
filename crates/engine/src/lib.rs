//! Strata Engine - layered filesystem engine
//!
//! Materializes a working directory incrementally through content-addressed
//! layers, the way OCI/Docker image layers work, reduced to a library:
//! - Tar layer archives with OCI-style whiteout deletions
//! - A content-addressed, atomically-written layer cache
//! - The session/step lifecycle that replays cache hits and records misses

pub mod archive;
pub mod cache;
pub mod error;
pub mod session;

// Re-export main types for convenience
pub use archive::{apply_layer, write_layer};
pub use cache::{CacheStats, LayerCache};
pub use error::{EngineError, Result};
pub use session::{LayerDescriptor, LayerStep, Session};

// The leaves callers need alongside the engine
pub use strata_core::{
    detect_changes, CancelToken, ChangeKind, FileChange, FileKind, LayerStats, Snapshot,
};
