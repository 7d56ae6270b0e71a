//! Cross-branch replicator - snapshot onto the auto-save branch and out

use super::{CycleOutcome, CycleStage, SyncEngine, TemporaryCommit, TransplantStatus};
use crate::git::{GitOps, RemoteSync, Transplant};
use crate::{Error, Result};
use chrono::Local;
use tracing::{debug, info, warn};

impl<G: GitOps> SyncEngine<G> {
    /// Carry `temp`'s changes to the auto-save branch, commit and push.
    ///
    /// Leaves HEAD on the auto-save branch (or wherever it failed). Putting
    /// the developer back is [`Self::restore`]'s job. Paths untracked by the
    /// exclusion step are appended to `untracked`, even if a later step fails.
    pub fn replicate(&self, temp: &TemporaryCommit, untracked: &mut Vec<String>) -> CycleOutcome {
        let branch = self.config.auto_save_branch.as_str();

        // New auto-save branches start at the developer's last real commit,
        // so the snapshot itself is never published.
        if let Err(e) = self.ensure_branch_from(branch, Some(&temp.parent)) {
            return CycleOutcome::aborted(CycleStage::Reconcile, &e);
        }

        match self.repo.fetch_and_rebase(branch) {
            Ok(RemoteSync::Rebased { replayed }) => {
                info!("Replayed {} local auto-save commit(s) onto remote tip", replayed);
            }
            Ok(state) => debug!("Remote sync: {:?}", state),
            Err(e) => {
                warn!("Could not catch up with remote {}, using local state: {}", branch, e);
                self.observer.step_failed(CycleStage::RemoteSync, &e);
            }
        }

        // While the developer's base is unchanged, only what changed since the
        // last replayed snapshot is new; the rest is already on the branch.
        let since = match self.repo.last_snapshot(branch) {
            Ok(Some(mark)) if mark.parent == temp.parent => Some(mark.id),
            Ok(_) => None,
            Err(e) => {
                warn!("Could not read last snapshot for {}: {}", branch, e);
                None
            }
        };

        let excluded_path = |path: &str| self.exclusions.is_excluded(path);
        let transplant = match self.repo.transplant(&temp.id, since.as_ref(), &excluded_path) {
            Ok(Transplant::Applied) => TransplantStatus::Applied,
            Ok(Transplant::Empty) => {
                info!("Auto-save branch already has these changes; skipping transplant");
                TransplantStatus::Skipped
            }
            Ok(Transplant::Conflict { paths }) => {
                return CycleOutcome::aborted(CycleStage::Transplant, &Error::Conflict { paths });
            }
            Err(e) => return CycleOutcome::aborted(CycleStage::Transplant, &e),
        };

        let excluded = match self.apply_exclusions() {
            Ok(excluded) => excluded,
            Err(e) => return CycleOutcome::aborted(CycleStage::Exclude, &e),
        };
        untracked.extend(excluded.iter().cloned());

        let commit = match self.repo.commit(&auto_save_message()) {
            Ok(commit) => commit,
            Err(e) => return CycleOutcome::aborted(CycleStage::Commit, &e),
        };
        if commit.is_none() {
            debug!("Auto-save branch already matches the snapshot");
        }
        if let Err(e) = self.remember_snapshot(branch, temp) {
            warn!("Could not record snapshot {}: {}", temp.id.short(), e);
        }

        if let Err(e) = self.repo.push(branch) {
            return CycleOutcome::aborted(CycleStage::Push, &e);
        }

        CycleOutcome::Success {
            commit,
            transplant,
            excluded,
        }
    }

    fn remember_snapshot(&self, branch: &str, temp: &TemporaryCommit) -> Result<()> {
        let saved = self.repo.head()?;
        self.repo.record_snapshot(branch, &temp.id, &saved)
    }

    /// Untrack every tracked path an exclusion pattern matches
    fn apply_exclusions(&self) -> Result<Vec<String>> {
        if self.exclusions.is_empty() {
            return Ok(Vec::new());
        }

        let tracked = self.repo.tracked_paths()?;
        let excluded = self.exclusions.select(tracked.iter().map(String::as_str));

        if !excluded.is_empty() {
            self.repo.untrack(&excluded)?;
            debug!("Excluded {} path(s) from auto-save", excluded.len());
        }

        Ok(excluded)
    }
}

/// Commit message for auto-save commits
fn auto_save_message() -> String {
    format!("Auto-save on {}", Local::now().format("%Y-%m-%d %H:%M:%S"))
}
