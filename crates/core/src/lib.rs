//! Strata Core - Snapshot and diff primitives for the strata layer engine
//!
//! This crate provides the leaves of the engine:
//! - BLAKE3 content digests
//! - Relative-path normalization with case-insensitive collision rules
//! - Directory snapshots (metadata + content digests)
//! - Change detection between snapshots
//! - Cooperative cancellation tokens

pub mod cancel;
pub mod diff;
pub mod digest;
pub mod path;
pub mod snapshot;

// Re-export main types for convenience
pub use cancel::CancelToken;
pub use diff::{detect_changes, ChangeKind, FileChange, LayerStats};
pub use digest::{digest_bytes, digest_file, ContentDigest};
pub use path::PathError;
pub use snapshot::{FileKind, FileMeta, Snapshot, SnapshotEntry, SnapshotError};
