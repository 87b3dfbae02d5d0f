//! Brings every remote branch of an existing working copy up to date.
//!
//! For a repository with local branches `L` and remote branches `R`, after a
//! successful run the local branches are `L ∪ R`: branches missing locally are
//! created as tracking branches, existing ones are fast-forwarded, and
//! local-only branches are left alone. The branch that was checked out on
//! entry is checked out again on exit whenever it still exists.
//!
//! A [`BranchHook`] that leaves uncommitted changes behind would block every
//! later checkout, so such a hook runs once, on the branch the working copy
//! ends up on, after restoration.

use std::{collections::HashSet, path::Path};

use crate::{
    cleanup::{CleanupOutcome, CommitStatus},
    error::{Error, Result},
    git2_ops::Head,
    report::RepoRecord,
    vcs::{PullOutcome, Vcs},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub remote_sha: String,
    pub has_local_counterpart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchStatus {
    Created,
    FastForwarded,
    UpToDate,
    /// Local and remote have diverged; the branch was skipped.
    Conflict,
    Failed(String),
}

impl BranchStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Created | Self::FastForwarded | Self::UpToDate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchResult {
    pub branch: String,
    pub status: BranchStatus,
    pub cleanup: Option<CleanupOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restoration {
    Restored,
    /// The original branch no longer exists; the working copy stays where it is.
    Missing { left_on: String },
    Failed(String),
}

/// Everything that happened to one repository during reconciliation.
#[derive(Debug)]
pub struct RepoState {
    pub original: Option<Head>,
    pub branches: Vec<BranchResult>,
    /// Set when the repository could not be reconciled at all.
    pub fatal: Option<Error>,
    pub restoration: Restoration,
    /// Cleanup of the final checked-out branch, for hooks that leave changes.
    pub final_cleanup: Option<CleanupOutcome>,
}

impl RepoState {
    fn aborted(original: Option<Head>, error: Error, restoration: Restoration) -> Self {
        Self {
            original,
            branches: Vec::new(),
            fatal: Some(error),
            restoration,
            final_cleanup: None,
        }
    }

    pub fn result(&self, branch: &str) -> Option<&BranchResult> {
        self.branches.iter().find(|b| b.branch == branch)
    }

    /// Fold branch counters, cleanup totals and errors into a report record.
    pub fn apply_to(&self, record: &mut RepoRecord) {
        if let Some(error) = &self.fatal {
            record.outcome = crate::report::RepoOutcome::Failed;
            record.error(error);
        }
        for result in &self.branches {
            let counts = &mut record.branches;
            match &result.status {
                BranchStatus::Created => counts.created += 1,
                BranchStatus::FastForwarded => counts.updated += 1,
                BranchStatus::UpToDate => counts.up_to_date += 1,
                BranchStatus::Conflict => {
                    counts.conflicts += 1;
                    record.error(format!(
                        "branch '{}': local and remote have diverged, skipped",
                        result.branch
                    ));
                }
                BranchStatus::Failed(message) => {
                    counts.failed += 1;
                    record.error(format!("branch '{}': {}", result.branch, message));
                }
            }
            if let Some(cleanup) = &result.cleanup {
                fold_cleanup(record, cleanup);
            }
        }
        if let Restoration::Failed(reason) = &self.restoration {
            record.error(format!("restoring original branch: {}", reason));
        }
        if let Some(cleanup) = &self.final_cleanup {
            fold_cleanup(record, cleanup);
        }
    }
}

fn fold_cleanup(record: &mut RepoRecord, cleanup: &CleanupOutcome) {
    let totals = &mut record.cleanup;
    totals.branches += 1;
    totals.matched += cleanup.matched.len() as u64;
    totals.removed += cleanup.removed.len() as u64;
    totals.failed += cleanup.failed.len() as u64;
    for (path, reason) in &cleanup.failed {
        record.error(format!(
            "cleanup on '{}': {}: {}",
            cleanup.branch,
            path.display(),
            reason
        ));
    }
    if let CommitStatus::Failed(reason) = &cleanup.commit {
        record.error(format!("cleanup commit on '{}': {}", cleanup.branch, reason));
    }
}

/// Called once per branch that ended up checked out and current.
pub trait BranchHook {
    fn on_branch_ready(&mut self, repo: &Path, branch: &str) -> Option<CleanupOutcome>;

    /// True when the hook leaves uncommitted changes in the working tree.
    fn leaves_changes(&self) -> bool {
        false
    }
}

/// Hook that does nothing.
pub struct NoHook;

impl BranchHook for NoHook {
    fn on_branch_ready(&mut self, _repo: &Path, _branch: &str) -> Option<CleanupOutcome> {
        None
    }
}

pub struct Reconciler<'a, V: Vcs + ?Sized> {
    vcs: &'a V,
    remote: &'a str,
}

impl<'a, V: Vcs + ?Sized> Reconciler<'a, V> {
    pub fn new(vcs: &'a V, remote: &'a str) -> Self {
        Self { vcs, remote }
    }

    pub fn reconcile(&self, repo: &Path, hook: &mut dyn BranchHook) -> RepoState {
        let original = match self.vcs.head(repo) {
            Ok(head) => head,
            Err(error) => {
                return RepoState::aborted(None, error, Restoration::Restored);
            }
        };
        tracing::debug!("{}: starting on {}", repo.display(), original);

        let refs = match self.prepare(repo) {
            Ok(refs) => refs,
            Err(error) => {
                let restoration = self.restore(repo, &original);
                return RepoState::aborted(Some(original), error, restoration);
            }
        };

        let per_branch = !hook.leaves_changes();
        let branches = refs
            .iter()
            .map(|branch| self.process_branch(repo, branch, hook, per_branch))
            .collect();
        let restoration = self.restore(repo, &original);
        let final_cleanup = if per_branch {
            None
        } else {
            self.clean_final_branch(repo, &restoration, hook)
        };

        RepoState {
            original: Some(original),
            branches,
            fatal: None,
            restoration,
            final_cleanup,
        }
    }

    /// Run a change-leaving hook on whatever is checked out after restoration.
    fn clean_final_branch(
        &self,
        repo: &Path,
        restoration: &Restoration,
        hook: &mut dyn BranchHook,
    ) -> Option<CleanupOutcome> {
        if let Restoration::Failed(_) = restoration {
            tracing::warn!(
                "{}: not cleaning up, the original branch could not be restored",
                repo.display()
            );
            return None;
        }
        let target = match self.vcs.head(repo) {
            Ok(Head::Branch(name) | Head::Unborn(name)) => name,
            Ok(Head::Detached(sha)) => sha,
            Err(error) => {
                tracing::warn!("{}: not cleaning up: {}", repo.display(), error);
                return None;
            }
        };
        tracing::info!(
            "{}: cleaning up '{}' only, other branches need --cleanup-auto-commit",
            repo.display(),
            target
        );
        hook.on_branch_ready(repo, &target)
    }

    /// Verify the remote, fetch, and enumerate remote branches.
    fn prepare(&self, repo: &Path) -> Result<Vec<BranchRef>> {
        if self.vcs.remote_url(repo, self.remote)?.is_none() {
            return Err(Error::git(
                "fetch",
                format!("no '{}' remote configured", self.remote),
            ));
        }
        self.vcs.fetch_all(repo, self.remote)?;
        self.branch_refs(repo)
    }

    pub fn branch_refs(&self, repo: &Path) -> Result<Vec<BranchRef>> {
        let local: HashSet<String> = self.vcs.local_branches(repo)?.into_iter().collect();
        Ok(self
            .vcs
            .remote_branches(repo, self.remote)?
            .into_iter()
            .map(|(name, remote_sha)| BranchRef {
                has_local_counterpart: local.contains(&name),
                name,
                remote_sha,
            })
            .collect())
    }

    fn process_branch(
        &self,
        repo: &Path,
        branch: &BranchRef,
        hook: &mut dyn BranchHook,
        run_hook: bool,
    ) -> BranchResult {
        let status = match self.sync_branch(repo, branch) {
            Ok(status) => status,
            Err(error) => BranchStatus::Failed(error.to_string()),
        };
        match &status {
            BranchStatus::Created => tracing::info!("  [NEW] {}", branch.name),
            BranchStatus::FastForwarded => tracing::info!("  [UPDATED] {}", branch.name),
            BranchStatus::UpToDate => tracing::debug!("  [OK] {}", branch.name),
            BranchStatus::Conflict => tracing::warn!(
                "  [CONFLICT] {}: local and remote have diverged, skipping",
                branch.name
            ),
            BranchStatus::Failed(message) => {
                tracing::warn!("  [FAILED] {}: {}", branch.name, message)
            }
        }
        let cleanup = if run_hook && status.is_ready() {
            hook.on_branch_ready(repo, &branch.name)
        } else {
            None
        };
        BranchResult {
            branch: branch.name.clone(),
            status,
            cleanup,
        }
    }

    fn sync_branch(&self, repo: &Path, branch: &BranchRef) -> Result<BranchStatus> {
        let remote_ref = format!("{}/{}", self.remote, branch.name);
        if !branch.has_local_counterpart {
            self.vcs
                .create_tracking_branch(repo, &branch.name, &remote_ref)?;
            return Ok(BranchStatus::Created);
        }
        self.vcs.checkout(repo, &branch.name)?;
        Ok(match self.vcs.pull_fast_forward(repo, &remote_ref)? {
            PullOutcome::UpToDate => BranchStatus::UpToDate,
            PullOutcome::FastForwarded => BranchStatus::FastForwarded,
            PullOutcome::Diverged => BranchStatus::Conflict,
        })
    }

    fn restore(&self, repo: &Path, original: &Head) -> Restoration {
        let current = match self.vcs.head(repo) {
            Ok(head) => head,
            Err(error) => return Restoration::Failed(error.to_string()),
        };
        if &current == original {
            return Restoration::Restored;
        }
        let target = match original {
            Head::Detached(sha) => sha.clone(),
            Head::Branch(name) | Head::Unborn(name) => {
                match self.vcs.local_branches(repo) {
                    Ok(local) if local.contains(name) => name.clone(),
                    Ok(_) => {
                        tracing::warn!(
                            "{}: original branch '{}' no longer exists, staying on {}",
                            repo.display(),
                            name,
                            current
                        );
                        return Restoration::Missing {
                            left_on: current.to_string(),
                        };
                    }
                    Err(error) => return Restoration::Failed(error.to_string()),
                }
            }
        };
        match self.vcs.checkout(repo, &target) {
            Ok(()) => Restoration::Restored,
            Err(error) => {
                tracing::error!(
                    "{}: could not return to {}: {}",
                    repo.display(),
                    original,
                    error
                );
                Restoration::Failed(error.to_string())
            }
        }
    }
}
