//! Directory snapshots
//!
//! A snapshot records the metadata of every file and directory below a root
//! at one instant. Keys are normalized relative paths compared
//! case-insensitively, so two paths differing only in ASCII letter case can
//! never both be present. Iteration is in sorted folded-key order, which
//! puts every directory before its children.

use crate::cancel::CancelToken;
use crate::digest::{digest_file, fallback_digest, ContentDigest};
use crate::path::{self, PathError};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

/// Kind of a snapshot entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

/// Metadata recorded for one snapshot entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Kind of entry
    pub kind: FileKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Last write time
    pub modified: SystemTime,
    /// Content digest; `None` for directories
    pub digest: Option<ContentDigest>,
}

impl FileMeta {
    /// Metadata for a directory entry
    pub fn directory(modified: SystemTime) -> Self {
        Self { kind: FileKind::Directory, size: 0, modified, digest: None }
    }

    /// Metadata for a regular file entry
    pub fn file(size: u64, modified: SystemTime, digest: ContentDigest) -> Self {
        Self { kind: FileKind::File, size, modified, digest: Some(digest) }
    }
}

/// One entry in a snapshot: the original normalized path plus its metadata
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    /// Normalized relative path as it appears on disk
    pub path: String,
    /// Recorded metadata
    pub meta: FileMeta,
}

/// Errors raised while building a snapshot
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("case-insensitive path collision: {first:?} vs {second:?}")]
    DuplicatePath { first: String, second: String },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("snapshot walk cancelled")]
    Cancelled,
}

/// A point-in-time view of a directory tree
///
/// Logically a set: iteration order is an implementation detail beyond the
/// parent-before-child guarantee.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Folded path -> entry
    entries: BTreeMap<String, SnapshotEntry>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, normalizing the path
    ///
    /// Re-inserting the same path replaces its metadata. Inserting a path
    /// that case-collides with a different existing path is an error.
    pub fn insert(&mut self, path: &str, meta: FileMeta) -> Result<(), SnapshotError> {
        let normalized = path::normalize(path)?;
        if normalized.is_empty() {
            // The root itself is not an entry.
            return Ok(());
        }

        let key = path::fold_case(&normalized);
        if let Some(existing) = self.entries.get(&key) {
            if existing.path != normalized {
                return Err(SnapshotError::DuplicatePath {
                    first: existing.path.clone(),
                    second: normalized,
                });
            }
        }

        self.entries.insert(key, SnapshotEntry { path: normalized, meta });
        Ok(())
    }

    /// Look up metadata by path (case-insensitive)
    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        let normalized = path::normalize(path).ok()?;
        self.entries.get(&path::fold_case(&normalized))
    }

    /// Look up by an already-folded key
    pub(crate) fn get_folded(&self, folded: &str) -> Option<&SnapshotEntry> {
        self.entries.get(folded)
    }

    /// True iff the path is present (case-insensitive)
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff the snapshot has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in sorted folded-key order
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.values()
    }

    /// Iterate (folded key, entry) pairs in sorted order
    pub(crate) fn iter_folded(&self) -> impl Iterator<Item = (&str, &SnapshotEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Walk `root` and capture a snapshot of everything below it
    ///
    /// A missing root yields an empty snapshot. Entries that disappear or
    /// cannot be read mid-walk are skipped; files that cannot be opened for
    /// digesting fall back to a metadata-derived digest so the walk stays
    /// total. Symlinks and other non-regular entries are skipped entirely.
    pub fn capture(root: &Path, cancel: &CancelToken) -> Result<Self, SnapshotError> {
        let mut snapshot = Self::new();

        if !root.exists() {
            return Ok(snapshot);
        }

        for result in walkdir::WalkDir::new(root).min_depth(1).follow_links(false) {
            if cancel.is_cancelled() {
                return Err(SnapshotError::Cancelled);
            }

            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable walk entry");
                    continue;
                }
            };

            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            let normalized = match path::normalize(&rel) {
                Ok(p) if !p.is_empty() => p,
                _ => continue,
            };

            let file_type = entry.file_type();
            let meta = if file_type.is_dir() {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                FileMeta::directory(modified)
            } else if file_type.is_file() {
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(err) => {
                        debug!(path = %normalized, error = %err, "skipping unreadable file");
                        continue;
                    }
                };
                let size = metadata.len();
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let digest = match digest_file(entry.path()) {
                    Ok(digest) => digest,
                    Err(err) => {
                        debug!(path = %normalized, error = %err, "digest fallback");
                        fallback_digest(size, modified)
                    }
                };
                FileMeta::file(size, modified, digest)
            } else {
                // Symlinks, sockets, devices: not part of the layer model.
                continue;
            };

            snapshot.insert(&normalized, meta)?;
        }

        Ok(snapshot)
    }
}
