//! Streaming layer-archive writer

use crate::archive::{opaque_whiteout_name, whiteout_name};
use crate::error::{EngineError, Result};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tar::{EntryType, Header};
use strata_core::path::fold_case;
use strata_core::{CancelToken, ChangeKind, FileChange, FileKind};
use tracing::debug;

/// Writer wrapper that counts the bytes passing through
struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Stream a change list into `sink` as a tar layer archive
///
/// Added and modified entries are written as directory or regular-file
/// entries, file bodies streamed from `base_dir/<path>`. Deletions become
/// whiteouts: an opaque whiteout for a directory recorded in the baseline,
/// a `.wh.<name>` sibling entry otherwise. Deletions already covered by a
/// deleted ancestor directory are elided; the ancestor's opaque whiteout
/// removes the whole subtree.
///
/// Fails with `DuplicatePath` before writing a single byte if two change
/// paths collide case-insensitively. Returns the total bytes written,
/// including the tar end-of-archive records.
pub fn write_layer<W: Write>(
    changes: &[FileChange],
    base_dir: &Path,
    sink: W,
    cancel: &CancelToken,
) -> Result<u64> {
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(changes.len());
    for change in changes {
        if let Some(first) = seen.insert(fold_case(&change.path), &change.path) {
            return Err(EngineError::DuplicatePath {
                first: first.to_string(),
                second: change.path.clone(),
            });
        }
    }

    let deleted_dirs: HashSet<String> = changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Deleted && c.entry_kind == FileKind::Directory)
        .map(|c| fold_case(&c.path))
        .collect();

    let mut builder = tar::Builder::new(CountingWriter::new(sink));
    let mut entries = 0usize;

    for change in changes {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match change.kind {
            ChangeKind::Added | ChangeKind::Modified => match change.entry_kind {
                FileKind::Directory => {
                    let mut header = neutral_header(EntryType::Directory, 0, 0o755);
                    builder.append_data(&mut header, &change.path, std::io::empty())?;
                    entries += 1;
                }
                FileKind::File => {
                    let file = File::open(base_dir.join(&change.path))?;
                    let size = file.metadata()?.len();
                    let mut header = neutral_header(EntryType::Regular, size, 0o644);
                    builder.append_data(&mut header, &change.path, file)?;
                    entries += 1;
                }
            },
            ChangeKind::Deleted => {
                if has_deleted_ancestor(&change.path, &deleted_dirs) {
                    continue;
                }

                let name = match change.entry_kind {
                    FileKind::Directory => opaque_whiteout_name(&change.path),
                    FileKind::File => whiteout_name(&change.path),
                };
                let mut header = neutral_header(EntryType::Regular, 0, 0o644);
                builder.append_data(&mut header, &name, std::io::empty())?;
                entries += 1;
            }
        }
    }

    builder.finish()?;
    let counting = builder.into_inner()?;

    debug!(entries, bytes = counting.written, "layer archive written");
    Ok(counting.written)
}

/// Tar header carrying only neutral metadata
///
/// Readers ignore mode/uid/gid/mtime; fixed values keep the byte stream
/// deterministic across hosts.
fn neutral_header(entry_type: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_ustar();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

/// True iff a strict ancestor directory of `path` is in the deleted set
fn has_deleted_ancestor(path: &str, deleted_dirs: &HashSet<String>) -> bool {
    let folded = fold_case(path);
    let mut end = 0;
    for (idx, byte) in folded.bytes().enumerate() {
        if byte == b'/' {
            end = idx;
            if deleted_dirs.contains(&folded[..end]) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Read;

    fn change(path: &str, kind: ChangeKind, entry_kind: FileKind) -> FileChange {
        FileChange { path: path.to_string(), kind, entry_kind }
    }

    fn entry_names(archive_bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(archive_bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_writes_files_and_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("src"))?;
        std::fs::write(dir.path().join("src/main.rs"), b"fn main() {}")?;

        let changes = vec![
            change("src", ChangeKind::Added, FileKind::Directory),
            change("src/main.rs", ChangeKind::Added, FileKind::File),
        ];

        let mut buf = Vec::new();
        let written = write_layer(&changes, dir.path(), &mut buf, &CancelToken::new())?;

        assert_eq!(written as usize, buf.len());
        assert_eq!(entry_names(&buf), vec!["src", "src/main.rs"]);

        // Body of the file entry round-trips.
        let mut archive = tar::Archive::new(buf.as_slice());
        let mut entries = archive.entries()?;
        entries.next().unwrap()?; // src
        let mut file_entry = entries.next().unwrap()?;
        let mut body = String::new();
        file_entry.read_to_string(&mut body)?;
        assert_eq!(body, "fn main() {}");
        Ok(())
    }

    #[test]
    fn test_neutral_header_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("f"), b"x")?;

        let changes = vec![change("f", ChangeKind::Added, FileKind::File)];
        let mut buf = Vec::new();
        write_layer(&changes, dir.path(), &mut buf, &CancelToken::new())?;

        let mut archive = tar::Archive::new(buf.as_slice());
        let entry = archive.entries()?.next().unwrap()?;
        let header = entry.header();
        assert_eq!(header.uid()?, 0);
        assert_eq!(header.gid()?, 0);
        assert_eq!(header.mtime()?, 0);
        Ok(())
    }

    #[test]
    fn test_deletions_become_whiteouts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let changes = vec![
            change("a.txt", ChangeKind::Deleted, FileKind::File),
            change("d1", ChangeKind::Deleted, FileKind::Directory),
        ];

        let mut buf = Vec::new();
        write_layer(&changes, dir.path(), &mut buf, &CancelToken::new())?;

        assert_eq!(entry_names(&buf), vec![".wh.a.txt", "d1/.wh..wh..opq"]);
        Ok(())
    }

    #[test]
    fn test_child_deletions_elided_under_deleted_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let changes = vec![
            change("d1", ChangeKind::Deleted, FileKind::Directory),
            change("d1/x.txt", ChangeKind::Deleted, FileKind::File),
            change("d1/sub", ChangeKind::Deleted, FileKind::Directory),
            change("d1/sub/y.txt", ChangeKind::Deleted, FileKind::File),
            change("other.txt", ChangeKind::Deleted, FileKind::File),
        ];

        let mut buf = Vec::new();
        write_layer(&changes, dir.path(), &mut buf, &CancelToken::new())?;

        assert_eq!(entry_names(&buf), vec!["d1/.wh..wh..opq", ".wh.other.txt"]);
        Ok(())
    }

    #[test]
    fn test_duplicate_paths_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let changes = vec![
            change("Foo.txt", ChangeKind::Added, FileKind::File),
            change("foo.txt", ChangeKind::Added, FileKind::File),
        ];

        let mut buf = Vec::new();
        let err = write_layer(&changes, dir.path(), &mut buf, &CancelToken::new()).unwrap_err();

        match err {
            EngineError::DuplicatePath { first, second } => {
                assert_eq!(first, "Foo.txt");
                assert_eq!(second, "foo.txt");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(buf.is_empty(), "nothing may be written on duplicate detection");
    }

    #[test]
    fn test_cancelled_mid_write() {
        let dir = tempfile::tempdir().unwrap();
        let changes = vec![change("d", ChangeKind::Added, FileKind::Directory)];

        let token = CancelToken::new();
        token.cancel();

        let mut buf = Vec::new();
        let err = write_layer(&changes, dir.path(), &mut buf, &token).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
