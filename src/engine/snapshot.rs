//! Snapshot committer - the dirty tree as one temporary commit

use super::{SyncEngine, TemporaryCommit};
use crate::git::GitOps;
use crate::{Error, Result};
use tracing::{debug, error, info};

/// Message tag of the temporary commit; it never outlives a cycle
pub const SNAPSHOT_MESSAGE: &str = "[flatworm] working-tree snapshot (temporary)";

impl<G: GitOps> SyncEngine<G> {
    /// Commit everything dirty on the current branch.
    ///
    /// Returns `None` for a clean tree. On failure the developer's index is
    /// put back before returning.
    pub fn capture_snapshot(&self) -> Result<Option<TemporaryCommit>> {
        if !self.repo.is_dirty()? {
            debug!("Working tree clean");
            return Ok(None);
        }

        let branch = self.repo.current_branch()?.ok_or(Error::DetachedHead)?;
        let parent = self.repo.head()?;
        let index_tree = self.repo.capture_index()?;

        let committed = self
            .repo
            .stage_all()
            .and_then(|()| self.repo.commit(SNAPSHOT_MESSAGE));

        let id = match committed {
            Ok(Some(id)) => id,
            Ok(None) => {
                // Dirty by status but identical content once staged
                self.repo.restore_index(&index_tree)?;
                debug!("Nothing to snapshot after staging");
                return Ok(None);
            }
            Err(e) => {
                if let Err(restore) = self.repo.restore_index(&index_tree) {
                    error!("Could not restore index after failed snapshot: {}", restore);
                }
                return Err(e);
            }
        };

        info!("Snapshot {} on {}", id.short(), branch);
        Ok(Some(TemporaryCommit {
            id,
            parent,
            branch,
            index_tree,
        }))
    }
}
