//! Session and layer-step lifecycle
//!
//! A session exclusively owns a working directory and replays or records
//! layers against it, one step at a time. Each step either replays a cached
//! archive (cache hit) or captures a baseline, lets the caller mutate the
//! working directory, and on commit diffs, archives, and stores the result.
//!
//! ```text
//!          init
//!           │
//!           ▼
//!       [unknown]
//!        │     │
//!  cache hit   cache miss
//!        │     │
//!        ▼     ▼
//!     open(hit) open(miss)
//!        │  \   /   │
//!     commit \ /  commit  cancel
//!        │    X    │       │
//!        ▼   / \   ▼       ▼
//!     committed  committed cancelled
//! ```

use crate::archive::{apply_layer, write_layer};
use crate::cache::{CacheStats, LayerCache};
use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use strata_core::{detect_changes, CancelToken, LayerStats, Snapshot};
use tracing::{debug, info};

/// Result of one successful layer step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Caller-supplied cache key of the step
    pub input_hash: String,
    /// Completion time, Unix milliseconds
    pub created_ts_ms: u64,
    /// Size of the stored archive in bytes (0 for cache hits and empty diffs)
    pub archive_size: u64,
    /// Change counters (all zero for cache hits and empty diffs)
    pub stats: LayerStats,
}

impl LayerDescriptor {
    fn empty(input_hash: &str) -> Self {
        Self {
            input_hash: input_hash.to_string(),
            created_ts_ms: now_unix_ms(),
            archive_size: 0,
            stats: LayerStats::default(),
        }
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A session over one working directory and one shared layer cache
///
/// The working directory is exclusively owned for the session's lifetime
/// and is never deleted by the session. The cache may be shared with other
/// sessions; all cache writes publish atomically.
#[derive(Debug)]
pub struct Session {
    working_dir: PathBuf,
    cache: LayerCache,
    applied: Mutex<Vec<LayerDescriptor>>,
    step_open: AtomicBool,
    disposed: AtomicBool,
}

impl Session {
    /// Create a session over `working_dir`, backed by the cache at `cache_dir`
    ///
    /// Creates the working directory if absent; an existing working
    /// directory must be empty. Creates the cache directory if absent.
    pub fn create(working_dir: impl AsRef<Path>, cache_dir: impl AsRef<Path>) -> Result<Self> {
        let working_dir = working_dir.as_ref();
        let cache_dir = cache_dir.as_ref();

        if working_dir.as_os_str().is_empty() {
            return Err(EngineError::InvalidArgument("working directory path is empty".into()));
        }
        if cache_dir.as_os_str().is_empty() {
            return Err(EngineError::InvalidArgument("cache directory path is empty".into()));
        }

        if working_dir.exists() {
            let mut entries = fs::read_dir(working_dir)?;
            if entries.next().is_some() {
                return Err(EngineError::WorkingDirectoryNotEmpty(working_dir.to_path_buf()));
            }
        } else {
            fs::create_dir_all(working_dir)?;
        }

        let cache = LayerCache::create(cache_dir)?;

        info!(
            working_dir = %working_dir.display(),
            cache_dir = %cache_dir.display(),
            "session created"
        );

        Ok(Self {
            working_dir: working_dir.to_path_buf(),
            cache,
            applied: Mutex::new(Vec::new()),
            step_open: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// The working directory this session owns
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Descriptors of the layers applied so far, in completion order
    pub fn applied_layers(&self) -> Vec<LayerDescriptor> {
        self.applied.lock().clone()
    }

    /// Counters for the backing cache
    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats()
    }

    /// Close the session
    ///
    /// Idempotent. The working directory is caller-owned and is left in
    /// place; the cache is untouched.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!(working_dir = %self.working_dir.display(), "session disposed");
        }
    }

    /// True once `dispose` has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Open a layer step for `input_hash`
    ///
    /// Captures the baseline snapshot first, then probes the cache: on a hit
    /// the cached archive is replayed into the working directory and the
    /// step's descriptor is appended immediately; on a miss the working
    /// directory is untouched and the caller is expected to do the step's
    /// work before calling [`LayerStep::commit`].
    ///
    /// At most one step may be open per session.
    pub fn begin_layer(&self, input_hash: &str, cancel: CancelToken) -> Result<LayerStep<'_>> {
        if self.is_disposed() {
            return Err(EngineError::SessionDisposed);
        }
        validate_input_hash(input_hash)?;

        if self
            .step_open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::ConcurrentStep);
        }

        match self.init_step(input_hash, cancel) {
            Ok(step) => Ok(step),
            Err(err) => {
                self.step_open.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn init_step(&self, input_hash: &str, cancel: CancelToken) -> Result<LayerStep<'_>> {
        // The baseline is captured before any cached archive is applied, so
        // it records the pre-step state.
        let baseline = Snapshot::capture(&self.working_dir, &cancel)?;

        let hit_descriptor = match self.cache.open(input_hash)? {
            Some(archive) => {
                apply_layer(archive, &self.working_dir, &cancel)?;
                let descriptor = LayerDescriptor::empty(input_hash);
                self.applied.lock().push(descriptor.clone());
                Some(descriptor)
            }
            None => None,
        };

        info!(
            input_hash,
            from_cache = hit_descriptor.is_some(),
            baseline_entries = baseline.len(),
            "layer step opened"
        );

        Ok(LayerStep {
            session: self,
            input_hash: input_hash.to_string(),
            baseline,
            cancel,
            hit_descriptor,
            phase: Phase::Open,
        })
    }

    fn release_step_slot(&self) {
        self.step_open.store(false, Ordering::SeqCst);
    }
}

fn validate_input_hash(input_hash: &str) -> Result<()> {
    if input_hash.trim().is_empty() {
        return Err(EngineError::InvalidArgument("input hash is empty".into()));
    }
    if input_hash.contains(['/', '\\', '\0']) {
        return Err(EngineError::InvalidArgument(
            "input hash contains a path separator or NUL".into(),
        ));
    }
    Ok(())
}

/// Lifecycle phase of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Committed,
    Cancelled,
    Disposed,
}

/// One layer step borrowed from its session
///
/// The borrow pins the session for the step's lifetime; dropping an open
/// step behaves like [`LayerStep::dispose`].
#[derive(Debug)]
pub struct LayerStep<'s> {
    session: &'s Session,
    input_hash: String,
    baseline: Snapshot,
    cancel: CancelToken,
    /// Descriptor appended at initialization for cache hits
    hit_descriptor: Option<LayerDescriptor>,
    phase: Phase,
}

impl<'s> LayerStep<'s> {
    /// The input hash this step was opened with
    pub fn input_hash(&self) -> &str {
        &self.input_hash
    }

    /// True iff initialization replayed a cached archive
    pub fn is_from_cache(&self) -> bool {
        self.hit_descriptor.is_some()
    }

    /// Commit the step
    ///
    /// For a cache hit this returns the descriptor appended at
    /// initialization. For a miss it snapshots the working directory, diffs
    /// against the baseline, and streams the diff archive into the cache
    /// under the step's input hash. An empty diff commits without touching
    /// the cache.
    ///
    /// Archive and cache errors leave the step open so the commit can be
    /// retried.
    pub fn commit(&mut self) -> Result<LayerDescriptor> {
        self.check_open()?;
        if self.session.is_disposed() {
            return Err(EngineError::SessionDisposed);
        }

        if let Some(descriptor) = &self.hit_descriptor {
            let descriptor = descriptor.clone();
            self.finalize(Phase::Committed);
            debug!(input_hash = %self.input_hash, "cache-hit step committed");
            return Ok(descriptor);
        }

        let after = Snapshot::capture(&self.session.working_dir, &self.cancel)?;
        let changes = detect_changes(&self.baseline, &after);

        if changes.is_empty() {
            let descriptor = LayerDescriptor::empty(&self.input_hash);
            self.session.applied.lock().push(descriptor.clone());
            self.finalize(Phase::Committed);
            debug!(input_hash = %self.input_hash, "empty-diff step committed");
            return Ok(descriptor);
        }

        // Stage the archive in an unlinked temp file so memory use stays
        // bounded no matter how large the layer is.
        let mut staging = tempfile::tempfile()?;
        let archive_size =
            write_layer(&changes, &self.session.working_dir, &mut staging, &self.cancel)?;
        staging.seek(SeekFrom::Start(0))?;

        self.session
            .cache
            .store(&self.input_hash, &mut staging, &self.cancel)?;

        let stats = LayerStats::from_changes(&changes);
        let descriptor = LayerDescriptor {
            input_hash: self.input_hash.clone(),
            created_ts_ms: now_unix_ms(),
            archive_size,
            stats,
        };
        self.session.applied.lock().push(descriptor.clone());
        self.finalize(Phase::Committed);

        info!(
            input_hash = %self.input_hash,
            archive_size,
            changes = changes.len(),
            "layer step committed"
        );
        Ok(descriptor)
    }

    /// Cancel the step
    ///
    /// Nothing is written to the cache. Changes the caller already made to
    /// the working directory are *not* rolled back; reconciling them is the
    /// caller's responsibility.
    pub fn cancel(&mut self) -> Result<()> {
        self.check_open()?;
        self.finalize(Phase::Cancelled);
        debug!(input_hash = %self.input_hash, "layer step cancelled");
        Ok(())
    }

    /// Close the step
    ///
    /// Idempotent. An open step is cancelled (without rollback); a
    /// finalized step is simply marked disposed.
    pub fn dispose(&mut self) {
        if self.phase == Phase::Open {
            self.finalize(Phase::Disposed);
            debug!(input_hash = %self.input_hash, "open layer step disposed");
        } else {
            self.phase = Phase::Disposed;
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.phase {
            Phase::Open => Ok(()),
            Phase::Disposed => Err(EngineError::StepDisposed),
            Phase::Committed | Phase::Cancelled => Err(EngineError::AlreadyFinalized),
        }
    }

    fn finalize(&mut self, phase: Phase) {
        self.phase = phase;
        self.session.release_step_slot();
    }
}

impl Drop for LayerStep<'_> {
    fn drop(&mut self) {
        if self.phase == Phase::Open {
            self.finalize(Phase::Disposed);
        }
    }
}
