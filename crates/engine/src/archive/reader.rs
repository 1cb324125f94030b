//! Streaming layer-archive reader

use crate::archive::{classify_whiteout, Whiteout};
use crate::error::{EngineError, Result};
use std::fs;
use std::io::Read;
use std::path::Path;
use strata_core::{path, CancelToken};
use tar::EntryType;
use tracing::debug;

/// Replay a layer archive over `target_dir`
///
/// Entries are consumed in stream order: directories are created, file
/// bodies are streamed to disk, and whiteout sentinels delete what they
/// name. Entry names are normalized and validated; absolute names and names
/// with `..` segments are rejected. Entry types other than directory,
/// regular file, and whiteout are skipped silently.
///
/// The stream is never buffered whole; a truncated or malformed stream
/// fails with `CorruptArchive`, leaving the target partially updated.
pub fn apply_layer<R: Read>(source: R, target_dir: &Path, cancel: &CancelToken) -> Result<()> {
    let mut archive = tar::Archive::new(source);
    let entries = archive
        .entries()
        .map_err(EngineError::corrupt("opening archive stream"))?;
    let mut applied = 0usize;

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut entry = entry.map_err(EngineError::corrupt("reading archive entry"))?;

        let raw_name = {
            let bytes = entry.path_bytes();
            std::str::from_utf8(&bytes)
                .map_err(|_| EngineError::CorruptArchive("entry name is not UTF-8".to_string()))?
                .to_string()
        };

        if raw_name.starts_with('/') {
            return Err(EngineError::InvalidPath {
                path: raw_name,
                reason: "absolute entry name",
            });
        }

        let name = path::normalize(&raw_name)?;
        if name.is_empty() {
            continue;
        }

        let (parent, leaf) = path::parent_and_leaf(&name);

        if let Some(whiteout) = classify_whiteout(leaf) {
            match whiteout {
                Whiteout::Opaque => {
                    if parent.is_empty() {
                        // An opaque whiteout at the archive root would name
                        // the working root itself; no valid layer emits one.
                        debug!("skipping opaque whiteout at archive root");
                        continue;
                    }
                    remove_entry(&target_dir.join(parent))?;
                }
                Whiteout::Sibling(target_leaf) => {
                    if target_leaf.is_empty() {
                        continue;
                    }
                    remove_entry(&target_dir.join(path::join(parent, target_leaf)))?;
                }
            }
            applied += 1;
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Directory => {
                let dest = target_dir.join(&name);
                // A regular file in the way gives way to the directory.
                if let Ok(meta) = fs::symlink_metadata(&dest) {
                    if !meta.is_dir() {
                        fs::remove_file(&dest)?;
                    }
                }
                fs::create_dir_all(&dest)?;
                applied += 1;
            }
            EntryType::Regular => {
                let dest = target_dir.join(&name);
                if let Some(parent_dir) = dest.parent() {
                    fs::create_dir_all(parent_dir)?;
                }
                // A directory in the way gives way to the file.
                if let Ok(meta) = fs::symlink_metadata(&dest) {
                    if meta.is_dir() {
                        fs::remove_dir_all(&dest)?;
                    }
                }
                let mut out = fs::File::create(&dest)?;
                std::io::copy(&mut entry, &mut out)
                    .map_err(EngineError::corrupt("streaming entry body"))?;
                applied += 1;
            }
            other => {
                debug!(entry_type = ?other, name = %name, "skipping unsupported entry type");
            }
        }
    }

    debug!(applied, "layer archive applied");
    Ok(())
}

/// Remove whatever exists at `path`: a file, or a directory tree
///
/// Absence is not an error; whiteout application is idempotent.
fn remove_entry(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
