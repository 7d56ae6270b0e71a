//! Git - The fixed command set the engine drives
//!
//! The engine never talks to `git2` directly. Everything it needs from a
//! repository goes through [`GitOps`], so a cycle can be exercised against
//! an in-memory fake as easily as against a real checkout.

mod remote;
mod repo;

pub use repo::Git2Repo;

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend-neutral object id (commit or tree), hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for ObjectId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// How a checkout treats the files currently on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// Refuse to overwrite anything that differs from HEAD
    Safe,
    /// Make tracked files match the target exactly; untracked files are left alone
    Force,
}

/// Result of replaying a commit's change set onto the current branch tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transplant {
    /// Changes applied to index and work tree, not yet committed
    Applied,
    /// The tip already contains an equivalent change
    Empty,
    /// The change set does not apply; nothing was touched
    Conflict { paths: Vec<String> },
}

/// What `fetch_and_rebase` did to the local branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSync {
    /// No remote-tracking ref exists for the branch
    NoRemote,
    /// Local already contains the remote tip
    UpToDate,
    /// Local moved forward to the remote tip
    FastForwarded,
    /// Local-only commits were replayed onto the remote tip
    Rebased { replayed: usize },
}

/// A snapshot that was replayed onto a branch, as remembered by the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMark {
    /// The snapshot commit
    pub id: ObjectId,
    /// The developer commit it was taken on top of
    pub parent: ObjectId,
}

/// Repository operations needed by a synchronization cycle.
///
/// Every method acts on the single repository the implementation was
/// opened on. Calls block until the underlying operation finishes.
pub trait GitOps {
    /// Short name of the checked-out branch, `None` when HEAD is detached
    fn current_branch(&self) -> Result<Option<String>>;

    /// Commit HEAD points at. Fails on an unborn branch.
    fn head(&self) -> Result<ObjectId>;

    /// Description of an in-progress operation (merge, rebase, ...), if any
    fn busy_state(&self) -> Result<Option<String>>;

    fn branch_exists(&self, name: &str) -> Result<bool>;

    fn create_branch(&self, name: &str, start: &ObjectId) -> Result<()>;

    /// Switch the work tree, index and HEAD to `name`
    fn checkout(&self, name: &str, mode: CheckoutMode) -> Result<()>;

    /// Whether the remote currently has a branch called `name`
    fn remote_has_branch(&self, name: &str) -> Result<bool>;

    /// Push `name` to the remote and make it the branch's upstream
    fn push(&self, name: &str) -> Result<()>;

    /// Fetch `name` from the remote and bring the local branch up to its tip.
    /// `name` must be checked out with a clean work tree.
    fn fetch_and_rebase(&self, name: &str) -> Result<RemoteSync>;

    /// Uncommitted tracked modifications or untracked, non-ignored files exist
    fn is_dirty(&self) -> Result<bool>;

    /// Write the current index out as a tree without changing anything else
    fn capture_index(&self) -> Result<ObjectId>;

    /// Replace the index with the contents of `tree`, leaving the work tree alone
    fn restore_index(&self, tree: &ObjectId) -> Result<()>;

    /// Stage every change: modifications, deletions and untracked files
    fn stage_all(&self) -> Result<()>;

    /// Commit the index on the current branch; `None` when it matches HEAD
    fn commit(&self, message: &str) -> Result<Option<ObjectId>>;

    /// Replay onto the current tip the changes `commit` makes relative to
    /// `since` (the commit's parent when `None`), without committing.
    ///
    /// A conflict on a path `drop_conflict` accepts is not reported; the path
    /// is left out of the result instead.
    fn transplant(
        &self,
        commit: &ObjectId,
        since: Option<&ObjectId>,
        drop_conflict: &dyn Fn(&str) -> bool,
    ) -> Result<Transplant>;

    /// Snapshot last recorded for `branch`, provided the commit that carried
    /// it is still part of the branch's history
    fn last_snapshot(&self, branch: &str) -> Result<Option<SnapshotMark>>;

    /// Remember `snapshot` as replayed onto `branch` by commit `saved`
    fn record_snapshot(&self, branch: &str, snapshot: &ObjectId, saved: &ObjectId) -> Result<()>;

    /// Paths present in the index, `/`-separated and repository relative
    fn tracked_paths(&self) -> Result<Vec<String>>;

    /// Drop `paths` from the index, keeping them on disk
    fn untrack(&self, paths: &[String]) -> Result<()>;

    /// Move the current branch to `target`, keeping index and work tree
    fn reset_soft(&self, target: &ObjectId) -> Result<()>;

    /// Delete untracked `paths` from the work tree; missing ones are ignored
    fn discard(&self, paths: &[String]) -> Result<()>;
}
