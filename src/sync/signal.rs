//! Pending-change signal shared by the watcher and the Sync Loop

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A "changes pending" flag with one writer side and one consumer.
///
/// The watcher calls [`raise`](Self::raise); the Sync Loop checks
/// [`is_raised`](Self::is_raised) and calls [`clear`](Self::clear) once a
/// cycle is done. Each clear bumps an epoch so the watcher can tell that the
/// work tree was just rewritten by a cycle and re-baseline instead of
/// raising again.
#[derive(Debug, Default)]
pub struct PendingSignal {
    pending: AtomicBool,
    epoch: AtomicU64,
}

impl PendingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Lower the flag and start a new epoch
    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}
