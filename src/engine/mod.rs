//! Engine - One synchronization cycle at a time
//!
//! A cycle is a short saga run against the developer's repository:
//!
//! 1. **Preflight**: refuse to start on a detached, unborn, busy or auto-save HEAD
//! 2. **Snapshot**: commit every dirty byte to the developer's branch
//! 3. **Replicate**: reconcile the auto-save branch, catch up with the remote,
//!    transplant the snapshot, drop excluded paths, commit and push
//! 4. **Rollback**: back to the developer's branch, snapshot undone
//!
//! Step 4 is the compensation for steps 2 and 3 and runs whenever a snapshot
//! exists, whatever happened in between. Nothing raised inside a cycle
//! escapes it; the result is a [`CycleReport`].

mod exclude;
mod observer;
mod reconcile;
mod replicate;
mod rollback;
mod snapshot;

pub use exclude::ExclusionFilter;
pub use observer::{CycleObserver, TracingObserver};
pub use snapshot::SNAPSHOT_MESSAGE;

use crate::git::{Git2Repo, GitOps, ObjectId};
use crate::{Config, Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info_span, warn};
use uuid::Uuid;

/// Where in the cycle something happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Preflight,
    Snapshot,
    Reconcile,
    RemoteSync,
    Transplant,
    Exclude,
    Commit,
    Push,
    Rollback,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Preflight => "preflight",
            CycleStage::Snapshot => "snapshot",
            CycleStage::Reconcile => "reconcile",
            CycleStage::RemoteSync => "remote-sync",
            CycleStage::Transplant => "transplant",
            CycleStage::Exclude => "exclude",
            CycleStage::Commit => "commit",
            CycleStage::Push => "push",
            CycleStage::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// How the snapshot landed on the auto-save branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransplantStatus {
    Applied,
    /// Auto-save tip already had an equivalent change
    Skipped,
}

/// What a cycle achieved
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Work tree was clean, nothing was committed anywhere
    NoOp,
    Success {
        /// New auto-save commit, `None` when the branch already matched
        commit: Option<ObjectId>,
        transplant: TransplantStatus,
        /// Paths dropped from the auto-save commit by exclusion patterns
        excluded: Vec<String>,
    },
    Aborted { stage: CycleStage, reason: String },
}

impl CycleOutcome {
    pub(crate) fn aborted(stage: CycleStage, error: &Error) -> Self {
        CycleOutcome::Aborted {
            stage,
            reason: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::NoOp => "no-op",
            CycleOutcome::Success { .. } => "success",
            CycleOutcome::Aborted { .. } => "aborted",
        }
    }
}

/// Whether the developer's branch was put back
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackStatus {
    /// No snapshot was taken, so there was nothing to undo
    NotNeeded,
    Restored,
    /// Repository left inconsistent; escalated through the observer
    Failed { reason: String },
}

/// Full record of one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Branch the developer was on when the cycle started
    pub origin_branch: Option<String>,
    pub outcome: CycleOutcome,
    pub rollback: RollbackStatus,
}

/// Snapshot commit sitting on top of the developer's branch for one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryCommit {
    pub id: ObjectId,
    /// Developer's tip before the snapshot; rollback resets to it
    pub parent: ObjectId,
    /// Branch the snapshot was made on
    pub branch: String,
    /// Developer's index as it was before everything got staged
    pub index_tree: ObjectId,
}

/// The synchronization engine
pub struct SyncEngine<G> {
    repo: G,
    config: Config,
    exclusions: ExclusionFilter,
    observer: Arc<dyn CycleObserver>,
}

impl SyncEngine<Git2Repo> {
    /// Open the configured repository with `git2`
    pub fn open(config: Config, observer: Arc<dyn CycleObserver>) -> Result<Self> {
        let repo = Git2Repo::open(&config.repository_path, config.remote.clone())?;
        Self::new(repo, config, observer)
    }
}

impl<G: GitOps> SyncEngine<G> {
    /// Create an engine over an already opened repository
    pub fn new(repo: G, config: Config, observer: Arc<dyn CycleObserver>) -> Result<Self> {
        let exclusions = ExclusionFilter::new(&config.exclusion_patterns)?;
        Ok(Self {
            repo,
            config,
            exclusions,
            observer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo(&self) -> &G {
        &self.repo
    }

    pub fn auto_save_branch(&self) -> &str {
        &self.config.auto_save_branch
    }

    /// Run one full cycle. Never fails; failures are reported in the outcome.
    pub fn run_cycle(&self) -> CycleReport {
        let id = Uuid::new_v4();
        let span = info_span!("cycle", id = %id, branch = %self.config.auto_save_branch);
        let _enter = span.enter();

        let started_at = Utc::now();
        let mut origin_branch = None;

        let (outcome, rollback) = match self.preflight() {
            Err(e) => (CycleOutcome::aborted(CycleStage::Preflight, &e), RollbackStatus::NotNeeded),
            Ok(origin) => {
                origin_branch = Some(origin.clone());
                self.snapshot_and_replicate(&origin)
            }
        };

        let report = CycleReport {
            id,
            started_at,
            finished_at: Utc::now(),
            origin_branch,
            outcome,
            rollback,
        };
        self.observer.cycle_finished(&report);
        report
    }

    /// Steps 2-4: everything after a snapshot exists is followed by rollback
    fn snapshot_and_replicate(&self, origin: &str) -> (CycleOutcome, RollbackStatus) {
        let temp = match self.capture_snapshot() {
            Ok(Some(temp)) => temp,
            Ok(None) => return (CycleOutcome::NoOp, RollbackStatus::NotNeeded),
            Err(e) => {
                return (CycleOutcome::aborted(CycleStage::Snapshot, &e), RollbackStatus::NotNeeded);
            }
        };

        let mut untracked = Vec::new();
        let outcome = self.replicate(&temp, &mut untracked);

        // Compensation: unconditional once a snapshot exists
        let rollback = match self.restore(origin, &temp, &untracked) {
            Ok(()) => RollbackStatus::Restored,
            Err(e) => {
                self.observer.escalate(&e);
                RollbackStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        (outcome, rollback)
    }

    /// Decide whether a cycle may start and return the developer's branch
    fn preflight(&self) -> Result<String> {
        if let Some(state) = self.repo.busy_state()? {
            return Err(Error::RepositoryBusy(state));
        }

        let Some(branch) = self.repo.current_branch()? else {
            return Err(Error::DetachedHead);
        };

        if branch == self.config.auto_save_branch {
            warn!("Developer is on the auto-save branch itself; skipping cycle");
            return Err(Error::OnAutoSaveBranch(branch));
        }

        // Fails on an unborn branch
        self.repo.head()?;

        Ok(branch)
    }
}
