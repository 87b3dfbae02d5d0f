//! git2 wrapper module for fast read-only git operations.
//!
//! Everything here only reads the repository; mutating and networked
//! operations go through the `git` binary (see [`crate::git`]).

use std::{collections::BTreeSet, path::Path};

use git2::{BranchType, Delta, DiffOptions, ErrorCode, Repository, Sort};

use crate::error::{Error, Result};

pub const DEFAULT_REMOTE: &str = "origin";

/// What HEAD points at when a repository is first opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// Checked out on a local branch.
    Branch(String),
    /// Detached at the given commit SHA.
    Detached(String),
    /// HEAD names a branch that has no commits yet (fresh or empty repository).
    Unborn(String),
}

impl Head {
    pub fn branch_name(&self) -> Option<&str> {
        match self {
            Self::Branch(name) | Self::Unborn(name) => Some(name),
            Self::Detached(_) => None,
        }
    }
}

impl std::fmt::Display for Head {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Branch(name) => write!(f, "{}", name),
            Self::Detached(sha) => write!(f, "detached HEAD at {}", &sha[..sha.len().min(12)]),
            Self::Unborn(name) => write!(f, "{} (no commits)", name),
        }
    }
}

/// One changed blob introduced by a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedBlob {
    pub commit: String,
    pub path: String,
    pub size: u64,
}

pub struct GitRepo {
    repo: Repository,
}

impl GitRepo {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open(path)
            .map_err(|e| Error::git("open", format!("{}: {}", path.display(), e.message())))?;
        Ok(Self { repo })
    }

    pub fn is_bare(&self) -> bool {
        self.repo.is_bare()
    }

    /// Equivalent to `git rev-parse --abbrev-ref HEAD`, keeping detached and
    /// unborn states distinct.
    pub fn head(&self) -> Result<Head> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => Ok(Head::Branch(
                head.shorthand()
                    .ok_or_else(|| Error::git("rev-parse", "HEAD has no shorthand name"))?
                    .to_string(),
            )),
            Ok(head) => Ok(Head::Detached(
                head.target()
                    .ok_or_else(|| Error::git("rev-parse", "HEAD has no target"))?
                    .to_string(),
            )),
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                let reference = self.repo.find_reference("HEAD")?;
                let target = reference
                    .symbolic_target()
                    .unwrap_or("refs/heads/main")
                    .trim_start_matches("refs/heads/")
                    .to_string();
                Ok(Head::Unborn(target))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all local branches, sorted.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Remote-tracking branches of `remote` as `(branch name, tip sha)`,
    /// skipping the symbolic `<remote>/HEAD`.
    pub fn remote_branches(&self, remote: &str) -> Result<Vec<(String, String)>> {
        let prefix = format!("{}/", remote);
        let mut branches = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Remote))? {
            let (branch, _) = branch?;
            let Some(name) = branch.name()? else {
                continue;
            };
            let Some(short) = name.strip_prefix(&prefix) else {
                continue;
            };
            if short == "HEAD" {
                continue;
            }
            let Some(target) = branch.get().target() else {
                continue;
            };
            branches.push((short.to_string(), target.to_string()));
        }
        Ok(branches)
    }

    /// Does this repository have a remote with the given name? Returns its URL.
    pub fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        match self.repo.find_remote(remote) {
            Ok(found) => Ok(found.url().map(|url| url.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the SHA of a reference (branch name, tag, or other ref).
    /// Equivalent to `git rev-parse <ref>`
    pub fn sha(&self, ref_name: &str) -> Result<String> {
        let obj = self
            .repo
            .revparse_single(ref_name)
            .map_err(|e| Error::git("rev-parse", format!("{}: {}", ref_name, e.message())))?;
        Ok(obj.id().to_string())
    }

    /// Check if ancestor_ref is an ancestor of (or equal to) descendant_ref.
    /// Equivalent to `git merge-base --is-ancestor <ancestor> <descendant>`
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let ancestor = self.repo.revparse_single(ancestor)?.peel_to_commit()?.id();
        let descendant = self.repo.revparse_single(descendant)?.peel_to_commit()?.id();
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(descendant, ancestor)?)
    }

    /// Every blob added or modified by each commit reachable from `branch`.
    ///
    /// Each commit is diffed against its first parent (or the empty tree for
    /// root commits). Sizes come from the object database header, so blob
    /// contents are never loaded.
    pub fn changed_blobs(&self, branch: &str) -> Result<Vec<ChangedBlob>> {
        let tip = self.repo.revparse_single(branch)?.peel_to_commit()?;
        let odb = self.repo.odb()?;

        let mut walk = self.repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(tip.id())?;

        let mut blobs = Vec::new();
        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            let tree = commit.tree()?;
            let parent_tree = match commit.parent(0) {
                Ok(parent) => Some(parent.tree()?),
                Err(_) => None,
            };
            let mut opts = DiffOptions::new();
            opts.ignore_submodules(true);
            let diff =
                self.repo
                    .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
            for delta in diff.deltas() {
                if !matches!(delta.status(), Delta::Added | Delta::Modified | Delta::Copied) {
                    continue;
                }
                let file = delta.new_file();
                let Some(path) = file.path().and_then(|p| p.to_str()) else {
                    continue;
                };
                let size = odb
                    .read_header(file.id())
                    .map(|(size, _)| size as u64)
                    .unwrap_or(0);
                blobs.push(ChangedBlob {
                    commit: commit.id().to_string(),
                    path: path.replace('\\', "/"),
                    size,
                });
            }
        }
        Ok(blobs)
    }
}
