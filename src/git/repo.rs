//! `git2`-backed implementation of [`GitOps`]

use super::{remote, CheckoutMode, GitOps, ObjectId, RemoteSync, SnapshotMark, Transplant};
use crate::{Error, Result};
use git2::{
    build::CheckoutBuilder, BranchType, ErrorCode, IndexAddOption, Oid, Repository,
    RepositoryState, ResetType, Signature, StatusOptions,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Identity used when the repository has no user.name / user.email configured
const FALLBACK_NAME: &str = "flatworm";
const FALLBACK_EMAIL: &str = "flatworm@localhost";

/// A work-tree repository opened with `git2`
pub struct Git2Repo {
    repo: Repository,
    remote: String,
}

impl Git2Repo {
    /// Open the repository at `path`, pushing to and fetching from `remote`
    pub fn open(path: impl AsRef<Path>, remote: impl Into<String>) -> Result<Self> {
        let repo = Repository::open(path.as_ref())?;
        if repo.is_bare() {
            return Err(Error::Config(format!(
                "{:?} is a bare repository; auto-save needs a work tree",
                path.as_ref()
            )));
        }

        Ok(Self {
            repo,
            remote: remote.into(),
        })
    }

    /// Root of the work tree
    pub fn workdir(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_path_buf)
    }

    /// Name of the remote this repository syncs with
    pub fn remote_name(&self) -> &str {
        &self.remote
    }

    fn oid(id: &ObjectId) -> Result<Oid> {
        Ok(Oid::from_str(id.as_str())?)
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
        }
    }

    fn head_tree_id(&self) -> Result<Option<Oid>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_tree()?.id())),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ref_target(&self, name: &str) -> Result<Option<Oid>> {
        match self.repo.refname_to_id(name) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn checkout_builder(mode: CheckoutMode) -> CheckoutBuilder<'static> {
        let mut builder = CheckoutBuilder::new();
        match mode {
            CheckoutMode::Safe => builder.safe(),
            CheckoutMode::Force => builder.force(),
        };
        builder
    }

    /// Replay local-only commits of `branch` onto `upstream`
    fn rebase_onto(&self, branch: &str, upstream: Oid) -> Result<usize> {
        let local_ref = self
            .repo
            .find_reference(&format!("refs/heads/{branch}"))?;
        let local = self.repo.reference_to_annotated_commit(&local_ref)?;
        let onto = self.repo.find_annotated_commit(upstream)?;

        let mut opts = git2::RebaseOptions::new();
        opts.checkout_options(Self::checkout_builder(CheckoutMode::Safe));

        let mut rebase = self.repo.rebase(Some(&local), Some(&onto), None, Some(&mut opts))?;
        let sig = self.signature()?;
        let mut replayed = 0;

        while let Some(op) = rebase.next() {
            if let Err(e) = op {
                rebase.abort()?;
                return Err(e.into());
            }
            if self.repo.index()?.has_conflicts() {
                rebase.abort()?;
                return Err(Error::Conflict {
                    paths: conflicted_paths(&self.repo.index()?)?,
                });
            }
            match rebase.commit(None, &sig, None) {
                Ok(_) => replayed += 1,
                // Already upstream
                Err(e) if e.code() == ErrorCode::Applied => {}
                Err(e) => {
                    rebase.abort()?;
                    return Err(e.into());
                }
            }
        }
        rebase.finish(Some(&sig))?;

        Ok(replayed)
    }
}

impl GitOps for Git2Repo {
    fn current_branch(&self) -> Result<Option<String>> {
        if self.repo.head_detached()? {
            return Ok(None);
        }
        // Works for unborn branches too, unlike repo.head()
        let head = self.repo.find_reference("HEAD")?;
        Ok(head
            .symbolic_target()
            .and_then(|t| t.strip_prefix("refs/heads/"))
            .map(str::to_string))
    }

    fn head(&self) -> Result<ObjectId> {
        match self.repo.head() {
            Ok(head) => Ok(head.peel_to_commit()?.id().into()),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                let branch = self.current_branch()?.unwrap_or_else(|| "HEAD".to_string());
                Err(Error::UnbornBranch(branch))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn busy_state(&self) -> Result<Option<String>> {
        let state = match self.repo.state() {
            RepositoryState::Clean => return Ok(None),
            RepositoryState::Merge => "merge",
            RepositoryState::Revert | RepositoryState::RevertSequence => "revert",
            RepositoryState::CherryPick | RepositoryState::CherryPickSequence => "cherry-pick",
            RepositoryState::Bisect => "bisect",
            RepositoryState::Rebase
            | RepositoryState::RebaseInteractive
            | RepositoryState::RebaseMerge => "rebase",
            RepositoryState::ApplyMailbox | RepositoryState::ApplyMailboxOrRebase => "am",
        };
        Ok(Some(state.to_string()))
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        match self.repo.find_branch(name, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create_branch(&self, name: &str, start: &ObjectId) -> Result<()> {
        let commit = self.repo.find_commit(Self::oid(start)?)?;
        self.repo.branch(name, &commit, false)?;
        debug!("Created branch {} at {}", name, start.short());
        Ok(())
    }

    fn checkout(&self, name: &str, mode: CheckoutMode) -> Result<()> {
        let refname = format!("refs/heads/{name}");
        let target = self.repo.revparse_single(&refname)?;

        self.repo
            .checkout_tree(&target, Some(&mut Self::checkout_builder(mode)))?;
        self.repo.set_head(&refname)?;

        debug!("Checked out {} ({:?})", name, mode);
        Ok(())
    }

    fn remote_has_branch(&self, name: &str) -> Result<bool> {
        remote::has_branch(&self.repo, &self.remote, name)
    }

    fn push(&self, name: &str) -> Result<()> {
        remote::push_branch(&self.repo, &self.remote, name)?;

        // Record what the remote now holds and track it
        let local = self.repo.refname_to_id(&format!("refs/heads/{name}"))?;
        self.repo.reference(
            &format!("refs/remotes/{}/{name}", self.remote),
            local,
            true,
            "flatworm: push",
        )?;
        let mut branch = self.repo.find_branch(name, BranchType::Local)?;
        branch.set_upstream(Some(&format!("{}/{name}", self.remote)))?;

        info!("Pushed {} to {}", name, self.remote);
        Ok(())
    }

    fn fetch_and_rebase(&self, name: &str) -> Result<RemoteSync> {
        remote::fetch_branch(&self.repo, &self.remote, name)?;

        let upstream = match self
            .repo
            .refname_to_id(&format!("refs/remotes/{}/{name}", self.remote))
        {
            Ok(oid) => oid,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(RemoteSync::NoRemote),
            Err(e) => return Err(e.into()),
        };
        let local = self.repo.refname_to_id(&format!("refs/heads/{name}"))?;

        if local == upstream || self.repo.graph_descendant_of(local, upstream)? {
            return Ok(RemoteSync::UpToDate);
        }

        if self.repo.graph_descendant_of(upstream, local)? {
            let target = self.repo.find_object(upstream, None)?;
            self.repo
                .checkout_tree(&target, Some(&mut Self::checkout_builder(CheckoutMode::Safe)))?;
            self.repo.reference(
                &format!("refs/heads/{name}"),
                upstream,
                true,
                "flatworm: fast-forward",
            )?;
            return Ok(RemoteSync::FastForwarded);
        }

        let replayed = self.rebase_onto(name, upstream)?;
        Ok(RemoteSync::Rebased { replayed })
    }

    fn is_dirty(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .exclude_submodules(true);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .any(|entry| !entry.status().is_empty() && !entry.status().is_ignored()))
    }

    fn capture_index(&self) -> Result<ObjectId> {
        let mut index = self.repo.index()?;
        Ok(index.write_tree()?.into())
    }

    fn restore_index(&self, tree: &ObjectId) -> Result<()> {
        let tree = self.repo.find_tree(Self::oid(tree)?)?;
        let mut index = self.repo.index()?;
        index.read_tree(&tree)?;
        index.write()?;
        Ok(())
    }

    fn stage_all(&self) -> Result<()> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // add_all never drops entries for files deleted from disk
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<Option<ObjectId>> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;

        if self.head_tree_id()? == Some(tree_id) {
            debug!("Index matches HEAD, nothing to commit");
            return Ok(None);
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

        debug!("Committed {}: {}", oid, message);
        Ok(Some(oid.into()))
    }

    fn transplant(
        &self,
        commit: &ObjectId,
        since: Option<&ObjectId>,
        drop_conflict: &dyn Fn(&str) -> bool,
    ) -> Result<Transplant> {
        let picked = self.repo.find_commit(Self::oid(commit)?)?;
        let ours = self.repo.head()?.peel_to_commit()?;
        let base = match since {
            Some(id) => self.repo.find_commit(Self::oid(id)?)?,
            None => picked.parent(0)?,
        };

        let mut merged =
            self.repo
                .merge_trees(&base.tree()?, &ours.tree()?, &picked.tree()?, None)?;
        if merged.has_conflicts() {
            let mut remaining = Vec::new();
            for path in conflicted_paths(&merged)? {
                if drop_conflict(&path) {
                    merged.conflict_remove(Path::new(&path))?;
                    debug!("Dropped conflicting path {}", path);
                } else {
                    remaining.push(path);
                }
            }
            if !remaining.is_empty() {
                return Ok(Transplant::Conflict { paths: remaining });
            }
        }

        let tree_id = merged.write_tree_to(&self.repo)?;
        if tree_id == ours.tree_id() {
            return Ok(Transplant::Empty);
        }

        // Checkout also rewrites the index to the merged tree
        let tree = self.repo.find_object(tree_id, None)?;
        self.repo
            .checkout_tree(&tree, Some(&mut Self::checkout_builder(CheckoutMode::Force)))?;

        Ok(Transplant::Applied)
    }

    fn last_snapshot(&self, branch: &str) -> Result<Option<SnapshotMark>> {
        let (Some(snapshot), Some(saved)) = (
            self.ref_target(&snapshot_ref(branch))?,
            self.ref_target(&saved_ref(branch))?,
        ) else {
            return Ok(None);
        };
        let Some(tip) = self.ref_target(&format!("refs/heads/{branch}"))? else {
            return Ok(None);
        };

        // A rewritten or reset branch no longer carries what was recorded
        if tip != saved && !self.repo.graph_descendant_of(tip, saved)? {
            debug!("Recorded auto-save {} is gone from {}", saved, branch);
            return Ok(None);
        }

        let commit = self.repo.find_commit(snapshot)?;
        Ok(Some(SnapshotMark {
            id: snapshot.into(),
            parent: commit.parent_id(0)?.into(),
        }))
    }

    fn record_snapshot(&self, branch: &str, snapshot: &ObjectId, saved: &ObjectId) -> Result<()> {
        self.repo
            .reference(&snapshot_ref(branch), Self::oid(snapshot)?, true, "flatworm: snapshot")?;
        self.repo
            .reference(&saved_ref(branch), Self::oid(saved)?, true, "flatworm: saved")?;
        Ok(())
    }

    fn tracked_paths(&self) -> Result<Vec<String>> {
        let index = self.repo.index()?;
        Ok(index
            .iter()
            .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
            .collect())
    }

    fn untrack(&self, paths: &[String]) -> Result<()> {
        let mut index = self.repo.index()?;
        for path in paths {
            index.remove_path(Path::new(path))?;
        }
        index.write()?;
        Ok(())
    }

    fn reset_soft(&self, target: &ObjectId) -> Result<()> {
        let commit = self.repo.find_object(Self::oid(target)?, None)?;
        self.repo.reset(&commit, ResetType::Soft, None)?;
        Ok(())
    }

    fn discard(&self, paths: &[String]) -> Result<()> {
        let Some(root) = self.repo.workdir() else {
            return Ok(());
        };
        for path in paths {
            match std::fs::remove_file(root.join(path)) {
                Ok(()) => debug!("Removed leftover {}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not remove leftover {}: {}", path, e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

fn snapshot_ref(branch: &str) -> String {
    format!("refs/flatworm/snapshot/{branch}")
}

fn saved_ref(branch: &str) -> String {
    format!("refs/flatworm/saved/{branch}")
}

fn conflicted_paths(index: &git2::Index) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            paths.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}
