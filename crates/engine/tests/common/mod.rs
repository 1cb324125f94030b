//! Shared fixtures for engine integration tests

// Not every test binary uses every helper.
#![allow(dead_code)]

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Write a file under `root`, creating parent directories as needed.
pub fn write_file(root: &Path, rel: &str, contents: &[u8]) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

/// Read a file under `root`.
pub fn read_file(root: &Path, rel: &str) -> Result<Vec<u8>> {
    Ok(fs::read(root.join(rel))?)
}

/// Relative listing of every file and directory below `root`, with file
/// contents, as a sorted map. Directories map to `None`.
pub fn tree_contents(root: &Path) -> Result<BTreeMap<String, Option<Vec<u8>>>> {
    let mut out = BTreeMap::new();
    for entry in walk(root)? {
        let rel = entry
            .strip_prefix(root)
            .expect("walked path is under root")
            .to_string_lossy()
            .replace('\\', "/");
        if entry.is_dir() {
            out.insert(rel, None);
        } else {
            out.insert(rel, Some(fs::read(&entry)?));
        }
    }
    Ok(out)
}

fn walk(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut paths = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Assert two directory trees hold the same paths and file contents.
pub fn assert_same_tree(left: &Path, right: &Path) {
    let left_tree = tree_contents(left).expect("reading left tree");
    let right_tree = tree_contents(right).expect("reading right tree");
    assert_eq!(left_tree, right_tree);
}
