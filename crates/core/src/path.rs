//! Layer path normalization and collision rules
//!
//! Every path stored in a snapshot or written to an archive is a normalized
//! relative path: forward-slash separated, no leading or trailing slash, no
//! `.`/`..` segments. Collision comparisons are ASCII case-insensitive so a
//! layer can be replayed identically on case-sensitive and case-insensitive
//! filesystems.

use thiserror::Error;

/// Errors raised while normalizing a layer path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

impl PathError {
    fn new(path: &str, reason: &'static str) -> Self {
        Self::InvalidPath { path: path.to_string(), reason }
    }
}

/// Normalize a relative path to canonical forward-slash form
///
/// Mixed separators are accepted: every `\` becomes `/`, runs of slashes
/// collapse, and leading/trailing slashes are stripped. Segments equal to
/// `.` or `..`, and any NUL byte, are rejected. An empty or whitespace-only
/// input denotes the working root and normalizes to the empty string.
///
/// The result is identical on every host operating system.
pub fn normalize(path: &str) -> Result<String, PathError> {
    if path.trim().is_empty() {
        return Ok(String::new());
    }

    if path.contains('\0') {
        return Err(PathError::new(path, "contains NUL byte"));
    }

    let unified = path.replace('\\', "/");
    let mut segments = Vec::new();

    for segment in unified.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment == "." {
            return Err(PathError::new(path, "contains `.` segment"));
        }
        if segment == ".." {
            return Err(PathError::new(path, "contains `..` segment"));
        }
        segments.push(segment);
    }

    Ok(segments.join("/"))
}

/// Case-fold a normalized path for collision comparison
///
/// Only ASCII letters fold; non-ASCII bytes compare verbatim.
pub fn fold_case(path: &str) -> String {
    path.to_ascii_lowercase()
}

/// True iff `path` collides case-insensitively with any element of `set`
///
/// Elements that fail normalization cannot collide and are skipped.
pub fn collides<I, S>(path: &str, set: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let target = match normalize(path) {
        Ok(p) => fold_case(&p),
        Err(_) => return false,
    };

    set.into_iter().any(|candidate| {
        normalize(candidate.as_ref())
            .map(|c| fold_case(&c) == target)
            .unwrap_or(false)
    })
}

/// Split a normalized path into its parent and leaf name
///
/// A single-segment path has the empty parent (the working root).
pub fn parent_and_leaf(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    }
}

/// Join a parent path and a leaf name
pub fn join(parent: &str, leaf: &str) -> String {
    if parent.is_empty() {
        leaf.to_string()
    } else {
        format!("{}/{}", parent, leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_simple() {
        assert_eq!(normalize("src/main.rs").unwrap(), "src/main.rs");
    }

    #[test]
    fn test_normalize_backslashes() {
        assert_eq!(normalize("src\\nested\\file.txt").unwrap(), "src/nested/file.txt");
    }

    #[test]
    fn test_normalize_mixed_separators() {
        assert_eq!(normalize("a\\b/c\\d").unwrap(), "a/b/c/d");
    }

    #[test]
    fn test_normalize_collapses_slash_runs() {
        assert_eq!(normalize("a//b///c").unwrap(), "a/b/c");
    }

    #[test]
    fn test_normalize_strips_leading_and_trailing() {
        assert_eq!(normalize("/a/b/").unwrap(), "a/b");
    }

    #[test]
    fn test_normalize_empty_and_whitespace() {
        assert_eq!(normalize("").unwrap(), "");
        assert_eq!(normalize("   ").unwrap(), "");
    }

    #[test]
    fn test_normalize_rejects_dot_segment() {
        assert!(normalize("a/./b").is_err());
        assert!(normalize("./a").is_err());
    }

    #[test]
    fn test_normalize_rejects_dotdot_segment() {
        assert!(normalize("a/../b").is_err());
        assert!(normalize("..").is_err());
    }

    #[test]
    fn test_normalize_rejects_nul() {
        assert!(normalize("a\0b").is_err());
    }

    #[test]
    fn test_fold_case_ascii_only() {
        assert_eq!(fold_case("Src/MAIN.rs"), "src/main.rs");
        // Non-ASCII is left alone
        assert_eq!(fold_case("Übung"), "Übung");
    }

    #[test]
    fn test_collides() {
        let set = ["src/Main.rs", "README.md"];

        assert!(collides("SRC/MAIN.RS", set));
        assert!(collides("readme.md", set));
        assert!(!collides("src/lib.rs", set));
    }

    #[test]
    fn test_collides_normalizes_both_sides() {
        assert!(collides("a\\B.txt", ["A/b.TXT"]));
    }

    #[test]
    fn test_parent_and_leaf() {
        assert_eq!(parent_and_leaf("a/b/c.txt"), ("a/b", "c.txt"));
        assert_eq!(parent_and_leaf("c.txt"), ("", "c.txt"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("a/b", "c"), "a/b/c");
        assert_eq!(join("", "c"), "c");
    }
}
