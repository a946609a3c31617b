//! Exclusive per-task workspaces backed by git branches and linked worktrees.
//!
//! One live workspace exists per branch name at any time; creation is an
//! atomic check-and-reserve so two concurrent tasks can never be granted the
//! same workspace. Destructive cleanup (directory removal, branch deletion)
//! is gated strictly behind a confirmed merge commit: a conflicted merge
//! leaves the branch, the directory, and the in-repo merge state untouched
//! for manual inspection.

use git2::build::CheckoutBuilder;
use git2::{BranchType, Repository, Signature, WorktreeAddOptions, WorktreePruneOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::WorkspaceError;

/// Lifecycle of a workspace. Transitions only ever move forward:
/// `Created -> Merged -> Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    Created,
    Merged,
    Removed,
}

impl WorkspaceState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkspaceState::Created => "created",
            WorkspaceState::Merged => "merged",
            WorkspaceState::Removed => "removed",
        }
    }
}

/// An exclusive, isolated branch + directory pair used by the implementation
/// and validation phases of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub branch_name: String,
    pub path: PathBuf,
    pub state: WorkspaceState,
}

impl Workspace {
    /// Move to the next lifecycle state, rejecting anything other than
    /// `Created -> Merged` and `Merged -> Removed`.
    fn advance(&mut self, next: WorkspaceState) -> Result<(), WorkspaceError> {
        let legal = matches!(
            (self.state, next),
            (WorkspaceState::Created, WorkspaceState::Merged)
                | (WorkspaceState::Merged, WorkspaceState::Removed)
        );
        if !legal {
            return Err(WorkspaceError::InvalidTransition {
                from: self.state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Result of a merge attempt. A conflict is a contract outcome, not an
/// error: nothing destructive happened and the workspace is still live.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Merge commit landed; workspace directory and branch are gone.
    Merged(Workspace),
    /// Index conflicts; the workspace stays `Created` and the repository is
    /// left mid-merge so the conflict can be inspected and resolved.
    Conflict(Workspace),
}

/// Creates and retires exclusive workspaces for concurrent tasks.
///
/// The pool is the only cross-task shared resource in the coordinator; all
/// operations take the live-workspace table lock for their full duration so
/// check-and-reserve is atomic.
pub struct WorkspacePool {
    repo_root: PathBuf,
    workspaces_dir: PathBuf,
    integration_branch: String,
    live: Mutex<HashMap<String, Workspace>>,
}

impl WorkspacePool {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        workspaces_dir: impl Into<PathBuf>,
        integration_branch: impl Into<String>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            workspaces_dir: workspaces_dir.into(),
            integration_branch: integration_branch.into(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of a live workspace, if any.
    pub fn get(&self, branch_name: &str) -> Option<Workspace> {
        self.live
            .lock()
            .ok()
            .and_then(|live| live.get(branch_name).cloned())
    }

    /// Create an exclusive workspace for `branch_name`.
    ///
    /// Fails with `AlreadyExists`, without side effects, if a live
    /// workspace, a local branch, or the target directory already exists.
    pub fn create(&self, branch_name: &str) -> Result<Workspace, WorkspaceError> {
        let mut live = self
            .live
            .lock()
            .map_err(|_| WorkspaceError::TablePoisoned)?;

        if live.contains_key(branch_name) {
            return Err(WorkspaceError::AlreadyExists(branch_name.to_string()));
        }

        let repo = Repository::open(&self.repo_root)?;
        if repo.find_branch(branch_name, BranchType::Local).is_ok() {
            return Err(WorkspaceError::AlreadyExists(branch_name.to_string()));
        }

        let path = self.workspaces_dir.join(branch_name);
        if path.exists() {
            return Err(WorkspaceError::PathOccupied { path });
        }
        fs::create_dir_all(&self.workspaces_dir).map_err(|source| WorkspaceError::Io {
            path: self.workspaces_dir.clone(),
            source,
        })?;

        let head = repo.head()?.peel_to_commit()?;
        let branch = repo.branch(branch_name, &head, false)?;
        let branch_ref = branch.into_reference();
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        repo.worktree(branch_name, &path, Some(&opts))?;

        let workspace = Workspace {
            branch_name: branch_name.to_string(),
            path,
            state: WorkspaceState::Created,
        };
        live.insert(branch_name.to_string(), workspace.clone());

        tracing::info!(
            branch = branch_name,
            path = %workspace.path.display(),
            "workspace created"
        );
        Ok(workspace)
    }

    /// Merge `branch_name` into the integration line.
    ///
    /// Performs, in order: (i) switch to the integration branch, (ii) a
    /// non-fast-forward merge (always a two-parent merge commit), (iii) only
    /// after the merge commit succeeds, removal of the worktree directory
    /// and deletion of the branch. On index conflicts the merge state is
    /// left in place and `Conflict` is returned with the workspace still
    /// `Created`.
    pub fn merge(&self, branch_name: &str) -> Result<MergeOutcome, WorkspaceError> {
        let mut live = self
            .live
            .lock()
            .map_err(|_| WorkspaceError::TablePoisoned)?;

        let mut workspace = live
            .get(branch_name)
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound(branch_name.to_string()))?;

        let repo = Repository::open(&self.repo_root)?;

        repo.set_head(&format!("refs/heads/{}", self.integration_branch))?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.checkout_head(Some(&mut checkout))?;

        let branch = repo.find_branch(branch_name, BranchType::Local)?;
        let integration_commit = repo
            .find_branch(&self.integration_branch, BranchType::Local)?
            .get()
            .peel_to_commit()?;
        let task_commit = branch.get().peel_to_commit()?;

        // A branch already contained in the integration line has nothing to
        // merge; everything else gets a two-parent merge commit.
        let base = repo.merge_base(integration_commit.id(), task_commit.id())?;
        if base != task_commit.id() {
            let annotated = repo.reference_to_annotated_commit(branch.get())?;
            repo.merge(&[&annotated], None, None)?;

            let mut index = repo.index()?;
            if index.has_conflicts() {
                tracing::warn!(
                    branch = branch_name,
                    "merge conflict; workspace left in created state for inspection"
                );
                return Ok(MergeOutcome::Conflict(workspace));
            }

            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;
            let sig = Signature::now("cadence", "cadence@localhost")?;
            repo.commit(
                Some("HEAD"),
                &sig,
                &sig,
                &format!("Merge workspace branch '{branch_name}'"),
                &tree,
                &[&integration_commit, &task_commit],
            )?;
            repo.cleanup_state()?;
        }

        workspace.advance(WorkspaceState::Merged)?;
        if let Some(entry) = live.get_mut(branch_name) {
            entry.state = WorkspaceState::Merged;
        }

        // Cleanup is only reachable from Merged.
        if workspace.path.exists() {
            fs::remove_dir_all(&workspace.path).map_err(|source| WorkspaceError::Io {
                path: workspace.path.clone(),
                source,
            })?;
        }
        let worktree = repo.find_worktree(branch_name)?;
        let mut prune_opts = WorktreePruneOptions::new();
        prune_opts.valid(true).working_tree(true);
        worktree.prune(Some(&mut prune_opts))?;
        repo.find_branch(branch_name, BranchType::Local)?.delete()?;

        workspace.advance(WorkspaceState::Removed)?;
        live.remove(branch_name);

        tracing::info!(branch = branch_name, "workspace merged and removed");
        Ok(MergeOutcome::Merged(workspace))
    }
}
