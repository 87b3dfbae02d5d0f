//! The version-control capabilities the sync engine relies on.
//!
//! [`GitCli`] shells out to `git` for anything that touches the network, the
//! index or the working tree, and answers read-only questions through git2.

use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    git::{run_git, run_git_ok},
    git2_ops::{ChangedBlob, GitRepo, Head},
};

/// Result of fast-forwarding the checked-out branch to its remote tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded,
    /// The local branch has commits the remote does not; nothing was changed.
    Diverged,
}

pub trait Vcs {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
    fn is_bare(&self, repo: &Path) -> Result<bool>;
    /// Typed lookup of a named remote; `None` when no such remote exists.
    fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>>;
    fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<()>;
    fn fetch_all(&self, repo: &Path, remote: &str) -> Result<()>;
    fn head(&self, repo: &Path) -> Result<Head>;
    fn local_branches(&self, repo: &Path) -> Result<Vec<String>>;
    /// `(name, tip sha)` for every remote-tracking branch of `remote`, in ref order.
    fn remote_branches(&self, repo: &Path, remote: &str) -> Result<Vec<(String, String)>>;
    /// Check out a branch name or a commit (detached).
    fn checkout(&self, repo: &Path, target: &str) -> Result<()>;
    fn create_tracking_branch(&self, repo: &Path, name: &str, remote_ref: &str) -> Result<()>;
    /// Fast-forward the checked-out branch to `remote_ref`; never merges.
    fn pull_fast_forward(&self, repo: &Path, remote_ref: &str) -> Result<PullOutcome>;
    /// Push `branch` to `target`, which is a remote name or a URL.
    fn push(&self, repo: &Path, target: &str, branch: &str, force: bool) -> Result<()>;
    fn stage_all(&self, repo: &Path) -> Result<()>;
    /// Commit staged changes. Returns `false` when there was nothing to commit.
    fn commit(&self, repo: &Path, message: &str) -> Result<bool>;
    /// Remove paths from the index, leaving the working tree alone.
    fn untrack(&self, repo: &Path, paths: &[PathBuf]) -> Result<()>;
    fn changed_blobs(&self, repo: &Path, branch: &str) -> Result<Vec<ChangedBlob>>;
    /// Drop every path matching `patterns` from all commits of all branches.
    fn rewrite_history(&self, repo: &Path, patterns: &[String]) -> Result<()>;
}

/// Production [`Vcs`] backed by the `git` binary and git2.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

impl Vcs for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| Error::git("clone", format!("{} has no parent", dest.display())))?;
        let dest_arg = dest.to_string_lossy();
        run_git(
            parent,
            &["-c", "core.longpaths=true", "clone", "--quiet", url, &dest_arg],
        )?;
        // Keep long paths working on later fetches and checkouts as well.
        run_git(dest, &["config", "core.longpaths", "true"])?;
        Ok(())
    }

    fn is_bare(&self, repo: &Path) -> Result<bool> {
        Ok(GitRepo::open(repo)?.is_bare())
    }

    fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>> {
        GitRepo::open(repo)?.remote_url(remote)
    }

    fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<()> {
        if self.remote_url(repo, remote)?.is_some() {
            run_git(repo, &["remote", "set-url", remote, url])?;
        } else {
            run_git(repo, &["remote", "add", remote, url])?;
        }
        Ok(())
    }

    fn fetch_all(&self, repo: &Path, remote: &str) -> Result<()> {
        run_git(repo, &["fetch", "--prune", "--quiet", remote])?;
        Ok(())
    }

    fn head(&self, repo: &Path) -> Result<Head> {
        GitRepo::open(repo)?.head()
    }

    fn local_branches(&self, repo: &Path) -> Result<Vec<String>> {
        GitRepo::open(repo)?.local_branches()
    }

    fn remote_branches(&self, repo: &Path, remote: &str) -> Result<Vec<(String, String)>> {
        GitRepo::open(repo)?.remote_branches(remote)
    }

    fn checkout(&self, repo: &Path, target: &str) -> Result<()> {
        run_git(repo, &["checkout", "--quiet", target])?;
        Ok(())
    }

    fn create_tracking_branch(&self, repo: &Path, name: &str, remote_ref: &str) -> Result<()> {
        run_git(repo, &["checkout", "--quiet", "--track", "-b", name, remote_ref])?;
        Ok(())
    }

    fn pull_fast_forward(&self, repo: &Path, remote_ref: &str) -> Result<PullOutcome> {
        let git_repo = GitRepo::open(repo)?;
        let local = git_repo.sha("HEAD")?;
        let remote = git_repo.sha(remote_ref)?;
        if local == remote {
            return Ok(PullOutcome::UpToDate);
        }
        if !git_repo.is_ancestor(&local, &remote)? {
            return Ok(PullOutcome::Diverged);
        }
        run_git(repo, &["merge", "--ff-only", "--quiet", remote_ref])?;
        Ok(PullOutcome::FastForwarded)
    }

    fn push(&self, repo: &Path, target: &str, branch: &str, force: bool) -> Result<()> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut args = vec!["push", "--quiet"];
        if force {
            args.push("--force");
        }
        args.push(target);
        args.push(&refspec);
        run_git(repo, &args)?;
        Ok(())
    }

    fn stage_all(&self, repo: &Path) -> Result<()> {
        run_git(repo, &["add", "--all"])?;
        Ok(())
    }

    fn commit(&self, repo: &Path, message: &str) -> Result<bool> {
        // `diff --cached --quiet` exits 0 when nothing is staged.
        if run_git_ok(repo, &["diff", "--cached", "--quiet"])? {
            return Ok(false);
        }
        run_git(repo, &["commit", "--quiet", "-m", message])?;
        Ok(true)
    }

    fn untrack(&self, repo: &Path, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut args = vec!["rm", "-r", "--cached", "--ignore-unmatch", "--quiet", "--"];
        args.extend(paths.iter().map(String::as_str));
        run_git(repo, &args)?;
        Ok(())
    }

    fn changed_blobs(&self, repo: &Path, branch: &str) -> Result<Vec<ChangedBlob>> {
        GitRepo::open(repo)?.changed_blobs(branch)
    }

    fn rewrite_history(&self, repo: &Path, patterns: &[String]) -> Result<()> {
        let version = run_git(repo, &["filter-repo", "--version"]).map_err(|_| {
            Error::HistoryRewrite(
                "git-filter-repo is not installed or not in PATH (pip install git-filter-repo)"
                    .to_string(),
            )
        })?;
        tracing::debug!("Using git-filter-repo {}", version.as_ref());
        let mut args = vec!["filter-repo", "--invert-paths"];
        for pattern in patterns {
            args.push("--path-glob");
            args.push(pattern);
        }
        args.push("--force");
        run_git(repo, &args).map_err(|e| Error::HistoryRewrite(e.to_string()))?;
        Ok(())
    }
}
