//! Shared test fixtures

#![allow(dead_code)]

pub mod fake;

use flatworm::{Config, CycleObserver, CycleReport, CycleStage, Error, Git2Repo, SyncEngine};
use git2::{BranchType, Oid, Repository, Signature, Status, StatusOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Observer that keeps everything it is told
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    pub reports: Arc<Mutex<Vec<CycleReport>>>,
    pub step_failures: Arc<Mutex<Vec<CycleStage>>>,
    pub escalations: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    pub fn reports(&self) -> Vec<CycleReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn step_failures(&self) -> Vec<CycleStage> {
        self.step_failures.lock().unwrap().clone()
    }

    pub fn escalations(&self) -> Vec<String> {
        self.escalations.lock().unwrap().clone()
    }
}

impl CycleObserver for RecordingObserver {
    fn cycle_finished(&self, report: &CycleReport) {
        self.reports.lock().unwrap().push(report.clone());
    }

    fn step_failed(&self, stage: CycleStage, _error: &Error) {
        self.step_failures.lock().unwrap().push(stage);
    }

    fn escalate(&self, error: &Error) {
        self.escalations.lock().unwrap().push(error.to_string());
    }
}

/// A work repository on `branch` with one commit, plus an empty bare remote
pub struct GitFixture {
    pub dir: TempDir,
    pub work: PathBuf,
    pub remote: PathBuf,
    pub branch: String,
    pub initial: Oid,
}

impl GitFixture {
    pub fn new(branch: &str, files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("work");
        let remote = dir.path().join("remote.git");

        Repository::init_bare(&remote).unwrap();
        let repo = Repository::init(&work).unwrap();
        {
            let mut cfg = repo.config().unwrap();
            cfg.set_str("user.name", "Test").unwrap();
            cfg.set_str("user.email", "test@test.com").unwrap();
        }
        repo.set_head(&format!("refs/heads/{branch}")).unwrap();
        repo.remote("origin", remote.to_str().unwrap()).unwrap();

        let mut fixture = Self {
            dir,
            work,
            remote,
            branch: branch.to_string(),
            initial: Oid::zero(),
        };

        fixture.write("README.md", "hello\n");
        for (path, content) in files {
            fixture.write(path, content);
        }
        fixture.initial = fixture.commit_all("initial");
        fixture
    }

    pub fn repo(&self) -> Repository {
        Repository::open(&self.work).unwrap()
    }

    pub fn remote_repo(&self) -> Repository {
        Repository::open_bare(&self.remote).unwrap()
    }

    pub fn config(&self, auto_save: &str) -> Config {
        Config::new(&self.work, auto_save)
    }

    pub fn engine(&self, config: Config) -> (SyncEngine<Git2Repo>, RecordingObserver) {
        let observer = RecordingObserver::default();
        let engine = SyncEngine::open(config, Arc::new(observer.clone())).unwrap();
        (engine, observer)
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.work.join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.path(rel)).ok()
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.path(rel)).unwrap();
    }

    /// Stage just `rel`
    pub fn stage(&self, rel: &str) {
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel)).unwrap();
        index.write().unwrap();
    }

    /// Stage everything and commit on the current branch
    pub fn commit_all(&self, message: &str) -> Oid {
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();

        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    pub fn head(&self) -> Oid {
        self.repo().head().unwrap().peel_to_commit().unwrap().id()
    }

    pub fn current_branch(&self) -> Option<String> {
        let repo = self.repo();
        let head = repo.head().ok()?;
        head.shorthand().map(str::to_string)
    }

    pub fn branch_tip(&self, branch: &str) -> Option<Oid> {
        let repo = self.repo();
        let branch = repo.find_branch(branch, BranchType::Local).ok()?;
        branch.get().target()
    }

    pub fn remote_tip(&self, branch: &str) -> Option<Oid> {
        self.remote_repo()
            .refname_to_id(&format!("refs/heads/{branch}"))
            .ok()
    }

    pub fn remote_branch_names(&self) -> Vec<String> {
        let remote = self.remote_repo();
        let branches = remote.branches(Some(BranchType::Local)).unwrap();
        let mut names: Vec<String> = branches
            .map(|b| b.unwrap().0.name().unwrap().unwrap().to_string())
            .collect();
        names.sort();
        names
    }

    /// Content of `path` at the remote tip of `branch`
    pub fn remote_file(&self, branch: &str, path: &str) -> Option<String> {
        let remote = self.remote_repo();
        let tip = remote.refname_to_id(&format!("refs/heads/{branch}")).ok()?;
        let tree = remote.find_commit(tip).ok()?.tree().ok()?;
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = remote.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).into_owned())
    }

    /// Parent of the remote tip of `branch`
    pub fn remote_parent(&self, branch: &str) -> Option<Oid> {
        let remote = self.remote_repo();
        let tip = remote.refname_to_id(&format!("refs/heads/{branch}")).ok()?;
        remote.find_commit(tip).ok()?.parent_id(0).ok()
    }

    /// Commit `path` = `content` straight into the remote on top of `branch`,
    /// as another clone would
    pub fn remote_commit(&self, branch: &str, path: &str, content: &str) -> Oid {
        let remote = self.remote_repo();
        let refname = format!("refs/heads/{branch}");
        let parent = remote.find_commit(remote.refname_to_id(&refname).unwrap()).unwrap();

        let blob = remote.blob(content.as_bytes()).unwrap();
        let mut builder = remote.treebuilder(Some(&parent.tree().unwrap())).unwrap();
        builder.insert(path, blob, 0o100644).unwrap();
        let tree = remote.find_tree(builder.write().unwrap()).unwrap();

        let sig = Signature::now("Other", "other@test.com").unwrap();
        remote
            .commit(Some(&refname), &sig, &sig, "from elsewhere", &tree, &[&parent])
            .unwrap()
    }

    /// Names of refs under `prefix` in the work repository
    pub fn refs_under(&self, prefix: &str) -> Vec<String> {
        let repo = self.repo();
        let refs = repo.references_glob(&format!("{prefix}*")).unwrap();
        refs.map(|r| r.unwrap().name().unwrap().to_string()).collect()
    }

    /// Path and status of every non-clean entry, for before/after comparison
    pub fn statuses(&self) -> Vec<(String, Status)> {
        let repo = self.repo();
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut opts)).unwrap();
        let mut entries: Vec<(String, Status)> = statuses
            .iter()
            .map(|e| (e.path().unwrap().to_string(), e.status()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
