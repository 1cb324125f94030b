//! Layer archives: POSIX tar streams with OCI-style whiteout entries
//!
//! A layer is serialized as a plain tar stream. Additions and modifications
//! are ordinary directory/file entries; deletions are encoded as whiteout
//! sentinels following the OCI image-layer convention:
//!
//! - `<dir>/.wh.<name>` deletes the sibling `<dir>/<name>`
//! - `<path>/.wh..wh..opq` removes the directory `<path>` entirely

pub mod reader;
pub mod writer;

pub use reader::apply_layer;
pub use writer::write_layer;

use strata_core::path;

/// Prefix marking a whiteout entry's leaf name
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Leaf name of an opaque directory whiteout
pub const OPAQUE_WHITEOUT_NAME: &str = ".wh..wh..opq";

/// Archive entry name deleting the sibling file or directory at `path`
pub fn whiteout_name(path: &str) -> String {
    let (parent, leaf) = path::parent_and_leaf(path);
    path::join(parent, &format!("{}{}", WHITEOUT_PREFIX, leaf))
}

/// Archive entry name removing the directory `path` entirely
pub fn opaque_whiteout_name(path: &str) -> String {
    path::join(path, OPAQUE_WHITEOUT_NAME)
}

/// What a whiteout leaf name means
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Whiteout<'a> {
    /// Remove the entry's parent directory recursively
    Opaque,
    /// Remove the named sibling
    Sibling(&'a str),
}

/// Classify a leaf name as a whiteout, if it is one
pub(crate) fn classify_whiteout(leaf: &str) -> Option<Whiteout<'_>> {
    if leaf == OPAQUE_WHITEOUT_NAME {
        return Some(Whiteout::Opaque);
    }
    leaf.strip_prefix(WHITEOUT_PREFIX).map(Whiteout::Sibling)
}
