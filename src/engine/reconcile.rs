//! Branch reconciler - local and remote agree that a branch exists

use super::SyncEngine;
use crate::git::{CheckoutMode, GitOps, ObjectId};
use crate::{Error, Result};
use tracing::{debug, info};

impl<G: GitOps> SyncEngine<G> {
    /// Make sure `name` exists locally, is checked out, and exists on the
    /// remote with tracking set up. A missing branch starts at the current tip.
    pub fn ensure_branch(&self, name: &str) -> Result<()> {
        self.ensure_branch_from(name, None)
    }

    /// Like [`Self::ensure_branch`], but a missing branch starts at `start`
    pub fn ensure_branch_from(&self, name: &str, start: Option<&ObjectId>) -> Result<()> {
        self.reconcile(name, start).map_err(|source| Error::Reconcile {
            branch: name.to_string(),
            source: Box::new(source),
        })
    }

    fn reconcile(&self, name: &str, start: Option<&ObjectId>) -> Result<()> {
        if self.repo.current_branch()?.as_deref() != Some(name) {
            if !self.repo.branch_exists(name)? {
                let start = match start {
                    Some(id) => id.clone(),
                    None => self.repo.head()?,
                };
                self.repo.create_branch(name, &start)?;
                info!("Created local branch {} at {}", name, start.short());
            }
            self.repo.checkout(name, CheckoutMode::Safe)?;
        }

        if self.repo.remote_has_branch(name)? {
            debug!("Branch {} already on remote", name);
        } else {
            self.repo.push(name)?;
            info!("Published branch {} to remote", name);
        }

        Ok(())
    }
}
