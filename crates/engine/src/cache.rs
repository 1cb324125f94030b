//! Content-addressed layer cache
//!
//! A cache is a directory of finished tar archives, one per input hash,
//! sharded by the first two characters of the hash to bound directory
//! fan-out:
//!
//! ```text
//! <cache_root>/
//!   ab/
//!     ab12cd....tar
//!     ab12cd....tar.tmp...   (in-flight store, removed on completion)
//! ```
//!
//! Writes stream into a `.tar.tmp`-prefixed sibling temp file, one per
//! store, and publish with an atomic rename, so a concurrent open observes
//! either a previous complete archive, the new complete archive, or
//! nothing. The cache knows nothing about layer chains; hash choice is the
//! caller's contract.

use crate::error::{EngineError, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copy buffer for streaming stores.
const STORE_BUF_SIZE: usize = 64 * 1024;

/// Suffix of a finished archive file.
const ARCHIVE_SUFFIX: &str = ".tar";

/// Suffix of an in-flight temp file.
const TEMP_SUFFIX: &str = ".tar.tmp";

/// Aggregate cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of finished archives
    pub archives: u64,
    /// Total size of finished archives in bytes
    pub total_bytes: u64,
}

/// Durable store of layer archives keyed by input hash
#[derive(Debug, Clone)]
pub struct LayerCache {
    root: PathBuf,
}

impl LayerCache {
    /// Open the cache at `root`, creating the directory if absent
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(EngineError::cache_io(format!("creating cache root {}", root.display())))?;
        Ok(Self { root })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True iff a finished archive exists for `hash`
    pub fn exists(&self, hash: &str) -> bool {
        self.archive_path(hash).is_file()
    }

    /// Open the archive for `hash` as a streaming byte source
    ///
    /// Returns `None` if no finished archive exists. In-flight temp files
    /// are never visible here.
    pub fn open(&self, hash: &str) -> Result<Option<File>> {
        match File::open(self.archive_path(hash)) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EngineError::cache_io(format!("opening archive for {hash:?}"))(err)),
        }
    }

    /// Stream `source` into the cache under `hash`
    ///
    /// Writes to a `<hash>.tar.tmp`-prefixed sibling temp file, fsyncs, and
    /// renames over the final name; each store gets its own temp file so
    /// concurrent stores of the same hash cannot clobber each other's bytes
    /// and the last rename wins. On any failure or cancellation the temp
    /// file is removed and nothing is published. Returns the number of
    /// bytes stored.
    pub fn store(
        &self,
        hash: &str,
        source: &mut impl Read,
        cancel: &strata_core::CancelToken,
    ) -> Result<u64> {
        let shard = self.shard_dir(hash);
        fs::create_dir_all(&shard)
            .map_err(EngineError::cache_io(format!("creating shard for {hash:?}")))?;

        // Dropping the NamedTempFile on any early return deletes it.
        let mut temp = tempfile::Builder::new()
            .prefix(&format!("{hash}{TEMP_SUFFIX}"))
            .tempfile_in(&shard)
            .map_err(EngineError::cache_io(format!("creating temp file for {hash:?}")))?;

        let mut buf = [0u8; STORE_BUF_SIZE];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let read = source
                .read(&mut buf)
                .map_err(EngineError::cache_io("reading archive source"))?;
            if read == 0 {
                break;
            }
            temp.write_all(&buf[..read])
                .map_err(EngineError::cache_io(format!("writing temp file for {hash:?}")))?;
            written += read as u64;
        }

        temp.as_file()
            .sync_all()
            .map_err(EngineError::cache_io(format!("syncing temp file for {hash:?}")))?;

        temp.persist(self.archive_path(hash))
            .map_err(|err| EngineError::cache_io(format!("publishing archive for {hash:?}"))(err.error))?;

        // Best-effort directory fsync so the rename survives a crash.
        if let Ok(dir) = File::open(&shard) {
            let _ = dir.sync_all();
        }

        debug!(hash, bytes = written, "layer archive stored");
        Ok(written)
    }

    /// Count finished archives and their total size
    ///
    /// Temp files and anything that is not a `.tar` are ignored.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();

        let shards = fs::read_dir(&self.root)
            .map_err(EngineError::cache_io("reading cache root"))?;
        for shard in shards {
            let shard = shard.map_err(EngineError::cache_io("reading cache root"))?;
            if !shard.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let entries = fs::read_dir(shard.path())
                .map_err(EngineError::cache_io("reading cache shard"))?;
            for entry in entries {
                let entry = entry.map_err(EngineError::cache_io("reading cache shard"))?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.ends_with(TEMP_SUFFIX) || !name.ends_with(ARCHIVE_SUFFIX) {
                    continue;
                }
                if let Ok(meta) = entry.metadata() {
                    stats.archives += 1;
                    stats.total_bytes += meta.len();
                }
            }
        }

        Ok(stats)
    }

    /// Shard directory for a hash: the first two characters, or the whole
    /// hash when shorter
    fn shard_dir(&self, hash: &str) -> PathBuf {
        let prefix_len = hash
            .char_indices()
            .nth(2)
            .map(|(idx, _)| idx)
            .unwrap_or(hash.len());
        self.root.join(&hash[..prefix_len])
    }

    fn archive_path(&self, hash: &str) -> PathBuf {
        self.shard_dir(hash).join(format!("{hash}{ARCHIVE_SUFFIX}"))
    }
}
