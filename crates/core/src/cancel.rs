//! Cooperative cancellation for long-running engine operations
//!
//! Directory walks, archive streaming, and cache writes all check the token
//! at their I/O boundaries. Clones share the underlying flag, so one token
//! handed to several operations cancels them all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag
///
/// `Default` yields a token that is never cancelled, for callers that do not
/// need cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the cancellation signal
    ///
    /// Idempotent; already-running operations observe it at their next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once `cancel` has been called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
