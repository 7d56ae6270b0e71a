//! Flatworm - Background auto-save of uncommitted work to a shadow branch
//!
//! This library mirrors a developer's dirty working tree onto a dedicated
//! auto-save branch and pushes it to a remote, leaving the developer's own
//! branch, index and files exactly as they were.
//!
//! ## Core Concepts
//!
//! - **Cycle**: one run of reconcile, snapshot, replicate and rollback
//! - **Snapshot**: a temporary commit on the developer's branch holding every dirty byte
//! - **Transplant**: replaying the snapshot's change set onto the auto-save branch tip
//! - **Rollback**: always-run compensation that puts the developer's branch back
//!
//! ## Layout
//!
//! - [`engine`]: the synchronization engine and its cycle steps
//! - [`git`]: the [`git::GitOps`] command set and its `git2` implementation
//! - [`sync`]: the pending-change signal and the polling Sync Loop
//! - [`watch`]: a polling work-tree watcher that raises the signal
//! - [`config`]: persisted engine configuration

pub mod cli;
pub mod config;
pub mod engine;
pub mod git;
pub mod sync;
pub mod watch;

pub use config::Config;
pub use engine::{
    CycleObserver, CycleOutcome, CycleReport, CycleStage, ExclusionFilter, RollbackStatus,
    SyncEngine, TemporaryCommit, TracingObserver, TransplantStatus, SNAPSHOT_MESSAGE,
};
pub use git::{CheckoutMode, Git2Repo, GitOps, ObjectId, SnapshotMark, Transplant};
pub use sync::{PendingSignal, SyncLoop};

/// Result type for flatworm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in flatworm operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Sync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No configuration found at {0:?}. Run 'flatworm init' first")]
    ConfigMissing(std::path::PathBuf),

    #[error("Invalid exclusion pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("HEAD is detached; auto-save needs a checked-out branch")]
    DetachedHead,

    #[error("Branch '{0}' has no commits yet")]
    UnbornBranch(String),

    #[error("Repository is busy ({0}); finish or abort it first")]
    RepositoryBusy(String),

    #[error("Currently on the auto-save branch '{0}'; switch to a working branch")]
    OnAutoSaveBranch(String),

    #[error("Push of '{branch}' rejected: {message}")]
    PushRejected { branch: String, message: String },

    #[error("Could not reconcile branch '{branch}': {source}")]
    Reconcile {
        branch: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Transplant conflicts in {}", paths.join(", "))]
    Conflict { paths: Vec<String> },

    #[error("Rollback to '{branch}' failed: {reason}")]
    RollbackFailed { branch: String, reason: String },
}
