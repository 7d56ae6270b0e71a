//! In-memory repository for driving the engine without git

use flatworm::git::RemoteSync;
use flatworm::{CheckoutMode, Error, GitOps, ObjectId, Result, SnapshotMark, Transplant};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

pub type Files = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct FakeCommit {
    pub parent: Option<ObjectId>,
    pub tree: Files,
    pub message: String,
}

/// Operations to make fail
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub push: bool,
    pub fetch: bool,
    pub remote_lookup: bool,
    pub conflict: bool,
    /// Checkouts of this branch fail
    pub checkout: Option<String>,
    /// Pushes wait here until released
    pub push_gate: Option<Gate>,
}

/// One-shot rendezvous between a blocked repository call and the test
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

#[derive(Debug, Default)]
struct GateState {
    entered: bool,
    released: bool,
}

impl Gate {
    /// Announce arrival and block until [`Gate::release`]
    pub fn enter(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        state.entered = true;
        cvar.notify_all();
        while !state.released {
            state = cvar.wait(state).unwrap();
        }
    }

    /// Block until some call is inside the gate
    pub fn wait_entered(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        while !state.entered {
            state = cvar.wait(state).unwrap();
        }
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().unwrap().released = true;
        cvar.notify_all();
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub current: Option<String>,
    pub branches: BTreeMap<String, ObjectId>,
    pub commits: BTreeMap<ObjectId, FakeCommit>,
    pub trees: BTreeMap<ObjectId, Files>,
    pub remote: BTreeMap<String, ObjectId>,
    pub workdir: Files,
    pub index: Files,
    pub busy: Option<String>,
    pub faults: Faults,
    pub calls: Vec<String>,
    /// Branch -> (snapshot, auto-save commit carrying it)
    pub marks: BTreeMap<String, (ObjectId, ObjectId)>,
    next_id: u64,
}

impl FakeState {
    fn alloc(&mut self, prefix: &str) -> ObjectId {
        self.next_id += 1;
        ObjectId::new(format!("{prefix}{:07}", self.next_id))
    }

    pub fn tree_of(&self, commit: &ObjectId) -> Files {
        self.commits[commit].tree.clone()
    }

    pub fn head_id(&self) -> Option<ObjectId> {
        self.current.as_ref().and_then(|b| self.branches.get(b)).cloned()
    }

    pub fn head_tree(&self) -> Files {
        self.head_id().map(|id| self.tree_of(&id)).unwrap_or_default()
    }

    pub fn tip_tree(&self, branch: &str) -> Files {
        self.tree_of(&self.branches[branch])
    }

    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    /// Whether `ancestor` is `commit` or reachable through its parents
    pub fn reaches(&self, commit: &ObjectId, ancestor: &ObjectId) -> bool {
        let mut cursor = Some(commit.clone());
        while let Some(id) = cursor {
            if &id == ancestor {
                return true;
            }
            cursor = self.commits.get(&id).and_then(|c| c.parent.clone());
        }
        false
    }

    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }
}

/// Cloneable handle; clones share state so tests can look inside after
/// the engine took ownership
#[derive(Debug, Clone, Default)]
pub struct FakeRepo {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRepo {
    /// Repository on `branch` with one commit holding `files`, clean tree
    pub fn new(branch: &str, files: &[(&str, &str)]) -> Self {
        let repo = Self::default();
        {
            let mut s = repo.state();
            let tree: Files = files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect();
            let id = s.alloc("c");
            s.commits.insert(
                id.clone(),
                FakeCommit {
                    parent: None,
                    tree: tree.clone(),
                    message: "initial".to_string(),
                },
            );
            s.branches.insert(branch.to_string(), id);
            s.current = Some(branch.to_string());
            s.workdir = tree.clone();
            s.index = tree;
        }
        repo
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn write(&self, path: &str, content: &str) {
        self.state()
            .workdir
            .insert(path.to_string(), content.to_string());
    }

    /// Commit `path` = `content` on the remote side of `branch` only
    pub fn foreign_commit(&self, branch: &str, path: &str, content: &str) -> ObjectId {
        let mut s = self.state();
        let parent = s.remote[branch].clone();
        let mut tree = s.tree_of(&parent);
        tree.insert(path.to_string(), content.to_string());
        let id = s.alloc("c");
        s.commits.insert(
            id.clone(),
            FakeCommit {
                parent: Some(parent),
                tree,
                message: "from elsewhere".to_string(),
            },
        );
        s.remote.insert(branch.to_string(), id.clone());
        id
    }

    pub fn faults(&self, faults: Faults) {
        self.state().faults = faults;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

impl GitOps for FakeRepo {
    fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.state().current.clone())
    }

    fn head(&self) -> Result<ObjectId> {
        let s = self.state();
        s.head_id()
            .ok_or_else(|| Error::UnbornBranch(s.current.clone().unwrap_or_default()))
    }

    fn busy_state(&self) -> Result<Option<String>> {
        Ok(self.state().busy.clone())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().branches.contains_key(name))
    }

    fn create_branch(&self, name: &str, start: &ObjectId) -> Result<()> {
        let mut s = self.state();
        s.record(format!("create_branch {name}"));
        s.branches.insert(name.to_string(), start.clone());
        Ok(())
    }

    fn checkout(&self, name: &str, mode: CheckoutMode) -> Result<()> {
        let mut s = self.state();
        s.record(format!("checkout {name} {mode:?}"));
        if s.faults.checkout.as_deref() == Some(name) {
            return Err(Error::Config(format!("checkout of {name} refused")));
        }
        let Some(target) = s.branches.get(name).cloned() else {
            return Err(Error::Config(format!("no branch {name}")));
        };

        let tree = s.tree_of(&target);
        let untracked: Files = s
            .workdir
            .iter()
            .filter(|(p, _)| !s.index.contains_key(*p))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        if mode == CheckoutMode::Safe && untracked.keys().any(|p| tree.contains_key(p)) {
            return Err(Error::Config("untracked file would be overwritten".to_string()));
        }

        let mut workdir = untracked;
        workdir.extend(tree.clone());
        s.workdir = workdir;
        s.index = tree;
        s.current = Some(name.to_string());
        Ok(())
    }

    fn remote_has_branch(&self, name: &str) -> Result<bool> {
        let mut s = self.state();
        s.record(format!("remote_has_branch {name}"));
        if s.faults.remote_lookup {
            return Err(Error::Config("remote unreachable".to_string()));
        }
        Ok(s.remote.contains_key(name))
    }

    fn push(&self, name: &str) -> Result<()> {
        let gate = self.state().faults.push_gate.clone();
        if let Some(gate) = gate {
            gate.enter();
        }

        let mut s = self.state();
        s.record(format!("push {name}"));
        if s.faults.push {
            return Err(Error::PushRejected {
                branch: name.to_string(),
                message: "non-fast-forward".to_string(),
            });
        }
        let tip = s.branches[name].clone();
        s.remote.insert(name.to_string(), tip);
        Ok(())
    }

    fn fetch_and_rebase(&self, name: &str) -> Result<RemoteSync> {
        let mut s = self.state();
        s.record(format!("fetch_and_rebase {name}"));
        if s.faults.fetch {
            return Err(Error::Config("network unreachable".to_string()));
        }
        match s.remote.get(name).cloned() {
            None => Ok(RemoteSync::NoRemote),
            Some(tip) if s.branches.get(name) == Some(&tip) => Ok(RemoteSync::UpToDate),
            Some(tip) => {
                let tree = s.tree_of(&tip);
                s.branches.insert(name.to_string(), tip);
                s.workdir = tree.clone();
                s.index = tree;
                Ok(RemoteSync::FastForwarded)
            }
        }
    }

    fn is_dirty(&self) -> Result<bool> {
        let s = self.state();
        Ok(s.workdir != s.index || s.index != s.head_tree())
    }

    fn capture_index(&self) -> Result<ObjectId> {
        let mut s = self.state();
        let id = s.alloc("t");
        let index = s.index.clone();
        s.trees.insert(id.clone(), index);
        Ok(id)
    }

    fn restore_index(&self, tree: &ObjectId) -> Result<()> {
        let mut s = self.state();
        s.record("restore_index");
        s.index = s.trees[tree].clone();
        Ok(())
    }

    fn stage_all(&self) -> Result<()> {
        let mut s = self.state();
        s.record("stage_all");
        s.index = s.workdir.clone();
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<Option<ObjectId>> {
        let mut s = self.state();
        if s.index == s.head_tree() {
            return Ok(None);
        }
        s.record(format!("commit {message}"));
        let id = s.alloc("c");
        let commit = FakeCommit {
            parent: s.head_id(),
            tree: s.index.clone(),
            message: message.to_string(),
        };
        s.commits.insert(id.clone(), commit);
        let branch = s.current.clone().unwrap();
        s.branches.insert(branch, id.clone());
        Ok(Some(id))
    }

    fn transplant(
        &self,
        commit: &ObjectId,
        since: Option<&ObjectId>,
        drop_conflict: &dyn Fn(&str) -> bool,
    ) -> Result<Transplant> {
        let mut s = self.state();
        s.record(format!("transplant {commit}"));

        let picked = s.commits[commit].clone();
        let base = match since.or(picked.parent.as_ref()) {
            Some(id) => s.tree_of(id),
            None => Files::new(),
        };

        let mut changes: Vec<(String, Option<String>)> = picked
            .tree
            .iter()
            .filter(|(p, c)| base.get(*p) != Some(*c))
            .map(|(p, c)| (p.clone(), Some(c.clone())))
            .collect();
        changes.extend(
            base.keys()
                .filter(|p| !picked.tree.contains_key(*p))
                .map(|p| (p.clone(), None)),
        );

        if s.faults.conflict {
            return Ok(Transplant::Conflict {
                paths: changes.into_iter().map(|(p, _)| p).collect(),
            });
        }

        let ours = s.head_tree();
        let mut merged = ours.clone();
        let mut conflicts = Vec::new();
        let mut applied = Vec::new();
        let mut dropped = Vec::new();
        for (path, content) in changes {
            let ours_changed = ours.get(&path) != base.get(&path);
            if ours_changed && ours.get(&path) != content.as_ref() {
                if drop_conflict(&path) {
                    merged.remove(&path);
                    dropped.push(path);
                } else {
                    conflicts.push(path);
                }
                continue;
            }
            match &content {
                Some(c) => merged.insert(path.clone(), c.clone()),
                None => merged.remove(&path),
            };
            applied.push((path, content));
        }
        if !conflicts.is_empty() {
            return Ok(Transplant::Conflict { paths: conflicts });
        }
        if merged == ours {
            return Ok(Transplant::Empty);
        }

        for (path, content) in applied {
            match content {
                Some(c) => s.workdir.insert(path, c),
                None => s.workdir.remove(&path),
            };
        }
        for path in dropped {
            if ours.contains_key(&path) {
                s.workdir.remove(&path);
            }
        }
        s.index = merged;
        Ok(Transplant::Applied)
    }

    fn last_snapshot(&self, branch: &str) -> Result<Option<SnapshotMark>> {
        let s = self.state();
        let Some((snapshot, saved)) = s.marks.get(branch) else {
            return Ok(None);
        };
        let Some(tip) = s.branches.get(branch) else {
            return Ok(None);
        };
        if !s.reaches(tip, saved) {
            return Ok(None);
        }
        let Some(parent) = s.commits[snapshot].parent.clone() else {
            return Ok(None);
        };
        Ok(Some(SnapshotMark {
            id: snapshot.clone(),
            parent,
        }))
    }

    fn record_snapshot(&self, branch: &str, snapshot: &ObjectId, saved: &ObjectId) -> Result<()> {
        let mut s = self.state();
        s.record(format!("record_snapshot {branch}"));
        s.marks
            .insert(branch.to_string(), (snapshot.clone(), saved.clone()));
        Ok(())
    }

    fn tracked_paths(&self) -> Result<Vec<String>> {
        Ok(self.state().index.keys().cloned().collect())
    }

    fn untrack(&self, paths: &[String]) -> Result<()> {
        let mut s = self.state();
        s.record(format!("untrack {}", paths.join(",")));
        for path in paths {
            s.index.remove(path);
        }
        Ok(())
    }

    fn reset_soft(&self, target: &ObjectId) -> Result<()> {
        let mut s = self.state();
        s.record(format!("reset_soft {target}"));
        let branch = s.current.clone().unwrap();
        s.branches.insert(branch, target.clone());
        Ok(())
    }

    fn discard(&self, paths: &[String]) -> Result<()> {
        let mut s = self.state();
        s.record(format!("discard {}", paths.join(",")));
        for path in paths {
            s.workdir.remove(path);
        }
        Ok(())
    }
}
