//! Rollback manager - the developer gets their branch back, always

use super::{SyncEngine, TemporaryCommit};
use crate::git::{CheckoutMode, GitOps};
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl<G: GitOps> SyncEngine<G> {
    /// Check out `origin` and soft-undo `temp`, restoring the developer's
    /// index. Work-tree content ends up exactly as it was before the snapshot.
    ///
    /// `untracked` lists paths the cycle untracked on the auto-save branch.
    /// Those the snapshot does not have are auto-save leftovers and are removed.
    ///
    /// Any error here means the repository is not where the developer left it.
    pub fn restore(&self, origin: &str, temp: &TemporaryCommit, untracked: &[String]) -> Result<()> {
        let failed = |reason: String| Error::RollbackFailed {
            branch: origin.to_string(),
            reason,
        };

        // Force: the snapshot holds every byte, and excluded files left
        // untracked on the auto-save branch would otherwise block the switch.
        self.repo
            .checkout(origin, CheckoutMode::Force)
            .map_err(|e| failed(format!("checkout failed: {e}")))?;

        let head = self
            .repo
            .head()
            .map_err(|e| failed(format!("cannot read HEAD: {e}")))?;
        if head != temp.id {
            // Someone moved the branch mid-cycle; resetting would discard their commit
            warn!(
                "{} is at {}, expected snapshot {}; leaving it alone",
                origin,
                head.short(),
                temp.id.short()
            );
            return Err(failed(format!(
                "branch moved to {} during the cycle; snapshot {} left in place",
                head.short(),
                temp.id.short()
            )));
        }

        if !untracked.is_empty() {
            // The index is the snapshot tree right after the checkout
            let tracked: HashSet<String> = self
                .repo
                .tracked_paths()
                .map_err(|e| failed(format!("cannot read index: {e}")))?
                .into_iter()
                .collect();
            let leftovers: Vec<String> = untracked
                .iter()
                .filter(|path| !tracked.contains(*path))
                .cloned()
                .collect();
            if !leftovers.is_empty() {
                // A stray file is not worth leaving the snapshot in place for
                match self.repo.discard(&leftovers) {
                    Ok(()) => debug!("Removed {} auto-save leftover(s)", leftovers.len()),
                    Err(e) => warn!("Could not remove auto-save leftovers: {}", e),
                }
            }
        }

        self.repo
            .reset_soft(&temp.parent)
            .map_err(|e| failed(format!("could not undo snapshot {}: {e}", temp.id.short())))?;
        self.repo
            .restore_index(&temp.index_tree)
            .map_err(|e| failed(format!("could not restore index: {e}")))?;

        info!("Restored {} to {}", origin, temp.parent.short());
        Ok(())
    }
}
