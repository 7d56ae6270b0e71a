//! Watch - Polling work-tree watcher
//!
//! Walks the work tree at a fixed interval and raises the
//! [`PendingSignal`] when any file appears, disappears, or changes size or
//! modification time. Directories on their own never raise it, and `.git`
//! is not looked at.

use crate::sync::PendingSignal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Size and modification time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    len: u64,
    modified: Option<SystemTime>,
}

/// Every file under a root, relative path to stamp
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fingerprint(BTreeMap<PathBuf, Stamp>);

impl Fingerprint {
    /// Walk `root`, skipping `.git`. Unreadable entries are ignored.
    pub fn scan(root: &Path) -> Self {
        let files = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_git_dir(e))
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let rel = e.path().strip_prefix(root).ok()?.to_path_buf();
                Some((
                    rel,
                    Stamp {
                        len: meta.len(),
                        modified: meta.modified().ok(),
                    },
                ))
            })
            .collect();

        Self(files)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_git_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == ".git"
}

/// Raises a [`PendingSignal`] when the work tree under `root` changes
pub struct PollWatcher {
    root: PathBuf,
    signal: Arc<PendingSignal>,
    interval: Duration,
}

impl PollWatcher {
    pub fn new(root: impl Into<PathBuf>, signal: Arc<PendingSignal>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            signal,
            interval,
        }
    }

    /// Poll forever. Cancel by aborting the task running it.
    pub async fn run(self) {
        let root = self.root.clone();
        let mut baseline = scan_blocking(root.clone()).await;
        let mut epoch = self.signal.epoch();
        debug!("Watching {:?} ({} files)", root, baseline.len());

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let current_epoch = self.signal.epoch();
            let current = scan_blocking(root.clone()).await;

            if current_epoch != epoch {
                // A cycle just finished and rewrote files; accept the result as-is
                trace!("Sync epoch {} -> {}, re-baselining", epoch, current_epoch);
                epoch = current_epoch;
                baseline = current;
                continue;
            }

            if current != baseline {
                debug!("Change detected under {:?}", root);
                baseline = current;
                self.signal.raise();
            }
        }
    }
}

async fn scan_blocking(root: PathBuf) -> Fingerprint {
    tokio::task::spawn_blocking(move || Fingerprint::scan(&root))
        .await
        .unwrap_or_default()
}
