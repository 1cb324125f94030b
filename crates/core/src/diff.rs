//! Change detection between two snapshots

use crate::snapshot::{FileKind, Snapshot};
use serde::{Deserialize, Serialize};

/// How a path changed between the baseline and the after snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Present only in the after snapshot
    Added,
    /// Present in both with differing metadata (or a kind change)
    Modified,
    /// Present only in the baseline
    Deleted,
}

/// One detected change
///
/// For `Deleted` the `entry_kind` is the kind the *baseline* recorded: that
/// is the authoritative signal for choosing between a plain whiteout and an
/// opaque directory whiteout downstream.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Normalized relative path
    pub path: String,
    /// Change category
    pub kind: ChangeKind,
    /// File or directory
    pub entry_kind: FileKind,
}

/// Compute the changes that turn `before` into `after`
///
/// Output is additions, then modifications, then deletions, each in sorted
/// path order, so a directory's addition always precedes its children's.
/// Directory entries are modified only by a kind change; directory mtime is
/// ignored. A file is modified iff its size, last write time, or content
/// digest differs.
pub fn detect_changes(before: &Snapshot, after: &Snapshot) -> Vec<FileChange> {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut deleted = Vec::new();

    for (key, after_entry) in after.iter_folded() {
        match before.get_folded(key) {
            None => added.push(FileChange {
                path: after_entry.path.clone(),
                kind: ChangeKind::Added,
                entry_kind: after_entry.meta.kind,
            }),
            Some(before_entry) => {
                let before_meta = &before_entry.meta;
                let after_meta = &after_entry.meta;

                let changed = if before_meta.kind != after_meta.kind {
                    true
                } else {
                    match after_meta.kind {
                        FileKind::Directory => false,
                        FileKind::File => {
                            before_meta.size != after_meta.size
                                || before_meta.modified != after_meta.modified
                                || before_meta.digest != after_meta.digest
                        }
                    }
                };

                if changed {
                    modified.push(FileChange {
                        path: after_entry.path.clone(),
                        kind: ChangeKind::Modified,
                        entry_kind: after_meta.kind,
                    });
                }
            }
        }
    }

    for (key, before_entry) in before.iter_folded() {
        if after.get_folded(key).is_none() {
            deleted.push(FileChange {
                path: before_entry.path.clone(),
                kind: ChangeKind::Deleted,
                entry_kind: before_entry.meta.kind,
            });
        }
    }

    added.extend(modified);
    added.extend(deleted);
    added
}

/// Per-layer change counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStats {
    pub files_added: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    pub dirs_added: u64,
    pub dirs_deleted: u64,
}

impl LayerStats {
    /// Tally a change list
    ///
    /// A kind change that turns a file into a directory counts as a
    /// directory addition (and vice versa as a file modification), since
    /// that is what materializes on disk.
    pub fn from_changes(changes: &[FileChange]) -> Self {
        let mut stats = Self::default();

        for change in changes {
            match (change.kind, change.entry_kind) {
                (ChangeKind::Added, FileKind::File) => stats.files_added += 1,
                (ChangeKind::Added, FileKind::Directory) => stats.dirs_added += 1,
                (ChangeKind::Modified, FileKind::File) => stats.files_modified += 1,
                (ChangeKind::Modified, FileKind::Directory) => stats.dirs_added += 1,
                (ChangeKind::Deleted, FileKind::File) => stats.files_deleted += 1,
                (ChangeKind::Deleted, FileKind::Directory) => stats.dirs_deleted += 1,
            }
        }

        stats
    }

    /// True iff every counter is zero
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
