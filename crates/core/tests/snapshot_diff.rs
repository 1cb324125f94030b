//! Snapshot + diff integration tests over a real directory tree

use anyhow::Result;
use std::fs;
use strata_core::{detect_changes, CancelToken, ChangeKind, FileKind, LayerStats, Snapshot};

#[test]
fn test_capture_then_mutate_then_diff() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();

    fs::create_dir(root.join("src"))?;
    fs::write(root.join("src/main.rs"), b"fn main() {}")?;
    fs::write(root.join("README.md"), b"# readme")?;

    let baseline = Snapshot::capture(root, &CancelToken::new())?;
    assert_eq!(baseline.len(), 3);

    // Mutate: modify one file, add one, delete one, add a directory.
    fs::write(root.join("src/main.rs"), b"fn main() { println!(\"hi\"); }")?;
    fs::write(root.join("src/lib.rs"), b"pub fn lib() {}")?;
    fs::remove_file(root.join("README.md"))?;
    fs::create_dir(root.join("assets"))?;

    let after = Snapshot::capture(root, &CancelToken::new())?;
    let changes = detect_changes(&baseline, &after);

    let find = |path: &str| changes.iter().find(|c| c.path == path);

    assert_eq!(find("src/main.rs").unwrap().kind, ChangeKind::Modified);
    assert_eq!(find("src/lib.rs").unwrap().kind, ChangeKind::Added);
    assert_eq!(find("README.md").unwrap().kind, ChangeKind::Deleted);
    assert_eq!(find("README.md").unwrap().entry_kind, FileKind::File);
    assert_eq!(find("assets").unwrap().kind, ChangeKind::Added);
    assert_eq!(find("assets").unwrap().entry_kind, FileKind::Directory);
    assert_eq!(changes.len(), 4);

    let stats = LayerStats::from_changes(&changes);
    assert_eq!(stats.files_added, 1);
    assert_eq!(stats.files_modified, 1);
    assert_eq!(stats.files_deleted, 1);
    assert_eq!(stats.dirs_added, 1);
    assert_eq!(stats.dirs_deleted, 0);
    Ok(())
}

#[test]
fn test_unchanged_tree_yields_empty_diff() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();

    fs::create_dir(root.join("d"))?;
    fs::write(root.join("d/file.bin"), vec![7u8; 4096])?;

    let first = Snapshot::capture(root, &CancelToken::new())?;
    let second = Snapshot::capture(root, &CancelToken::new())?;

    assert!(detect_changes(&first, &second).is_empty());
    Ok(())
}

#[test]
fn test_diff_against_empty_baseline_lists_everything() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();

    fs::create_dir_all(root.join("a/b"))?;
    fs::write(root.join("a/b/deep.txt"), b"deep")?;
    fs::write(root.join("shallow.txt"), b"shallow")?;

    let snapshot = Snapshot::capture(root, &CancelToken::new())?;
    let changes = detect_changes(&Snapshot::new(), &snapshot);

    assert_eq!(changes.len(), 4);
    assert!(changes.iter().all(|c| c.kind == ChangeKind::Added));

    // Parent directories come before their children.
    let order: Vec<_> = changes.iter().map(|c| c.path.as_str()).collect();
    let a = order.iter().position(|p| *p == "a").unwrap();
    let ab = order.iter().position(|p| *p == "a/b").unwrap();
    let deep = order.iter().position(|p| *p == "a/b/deep.txt").unwrap();
    assert!(a < ab && ab < deep);
    Ok(())
}
