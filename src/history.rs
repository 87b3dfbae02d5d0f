//! Finding and purging junk files from the full commit history.
//!
//! [`analyze`] is read-only and runs in every mode. [`rewrite`] destroys
//! history and needs a [`RewriteConfirmation`], which only exists when the
//! user asked for a history rewrite outside of dry-run mode.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::Path,
};

use colored::Colorize;
use serde::Serialize;

use crate::{
    cleanup::PatternSet,
    error::{Error, Result},
    git2_ops::DEFAULT_REMOTE,
    vcs::Vcs,
};

/// A path that appears in at least one commit of a branch and matches a
/// file pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFound {
    pub path: String,
    pub commit_count: usize,
    pub approx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRewritePlan {
    pub branch: String,
    /// Sorted by path.
    pub files: Vec<FileFound>,
    /// File patterns that matched at least one path on this branch.
    pub patterns: Vec<String>,
}

impl HistoryRewritePlan {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.approx_bytes).sum()
    }
}

/// Proof that the user explicitly asked for a destructive rewrite.
#[derive(Debug)]
pub struct RewriteConfirmation(());

impl RewriteConfirmation {
    pub fn from_flags(history: bool, dry_run: bool) -> Option<Self> {
        (history && !dry_run).then_some(Self(()))
    }
}

#[derive(Debug, Default)]
pub struct RewriteOutcome {
    pub patterns: Vec<String>,
    pub rewritten: bool,
    pub pushed: Vec<String>,
    pub push_failures: Vec<(String, String)>,
}

/// Scan every local branch for historical files matching the file-scoped
/// remove patterns. Directory patterns are ignored.
pub fn analyze<V: Vcs + ?Sized>(
    vcs: &V,
    repo: &Path,
    patterns: &PatternSet,
) -> Result<Vec<HistoryRewritePlan>> {
    let file_patterns: Vec<_> = patterns.remove.iter().filter(|p| !p.is_directory).collect();
    let mut plans = Vec::new();
    if file_patterns.is_empty() {
        return Ok(plans);
    }

    for branch in vcs.local_branches(repo)? {
        let mut found: BTreeMap<String, (HashSet<String>, u64)> = BTreeMap::new();
        let mut matched_patterns = BTreeSet::new();
        for blob in vcs.changed_blobs(repo, &branch)? {
            let Some(pattern) = file_patterns.iter().find(|p| p.matches(&blob.path, false))
            else {
                continue;
            };
            matched_patterns.insert(pattern.glob.clone());
            let entry = found.entry(blob.path).or_default();
            entry.0.insert(blob.commit);
            entry.1 += blob.size;
        }
        let files: Vec<FileFound> = found
            .into_iter()
            .map(|(path, (commits, bytes))| FileFound {
                path,
                commit_count: commits.len(),
                approx_bytes: bytes,
            })
            .collect();
        tracing::debug!(
            "[HISTORY] {}: {} matching file(s) on '{}'",
            repo.display(),
            files.len(),
            branch
        );
        plans.push(HistoryRewritePlan {
            branch,
            files,
            patterns: matched_patterns.into_iter().collect(),
        });
    }
    Ok(plans)
}

/// Rewrite history to drop everything the plans found, then force-push each
/// branch that existed before the rewrite.
pub fn rewrite<V: Vcs + ?Sized>(
    vcs: &V,
    repo: &Path,
    plans: &[HistoryRewritePlan],
    _confirmed: RewriteConfirmation,
) -> Result<RewriteOutcome> {
    let patterns: Vec<String> = plans
        .iter()
        .flat_map(|p| p.patterns.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut outcome = RewriteOutcome {
        patterns: patterns.clone(),
        ..RewriteOutcome::default()
    };
    if patterns.is_empty() {
        tracing::info!("[HISTORY] {}: nothing to rewrite", repo.display());
        return Ok(outcome);
    }

    // filter-repo drops the remote, so capture it first.
    let origin = vcs.remote_url(repo, DEFAULT_REMOTE)?.ok_or_else(|| {
        Error::HistoryRewrite(format!("no '{}' remote to push the rewrite to", DEFAULT_REMOTE))
    })?;
    let branches = vcs.local_branches(repo)?;

    tracing::warn!(
        "[HISTORY] Rewriting history of {} to remove {}",
        repo.display(),
        patterns.join(", ")
    );
    vcs.rewrite_history(repo, &path_globs(&patterns))?;
    outcome.rewritten = true;

    if vcs.remote_url(repo, DEFAULT_REMOTE)?.as_deref() != Some(origin.as_str()) {
        vcs.set_remote_url(repo, DEFAULT_REMOTE, &origin)?;
    }

    for branch in branches {
        match vcs.push(repo, DEFAULT_REMOTE, &branch, true) {
            Ok(()) => {
                tracing::info!("[HISTORY] Force-pushed '{}'", branch);
                outcome.pushed.push(branch);
            }
            Err(error) => {
                tracing::error!("[HISTORY] Force-push of '{}' failed: {}", branch, error);
                outcome.push_failures.push((branch, error.to_string()));
            }
        }
    }
    Ok(outcome)
}

/// Full-path globs for `git filter-repo --path-glob` covering the same files
/// [`analyze`] matched. A pattern without a `/` also matches by file name, so
/// it gets a `*/` twin for nested paths.
pub fn path_globs(patterns: &[String]) -> Vec<String> {
    let mut globs = Vec::new();
    for pattern in patterns {
        globs.push(pattern.clone());
        if !pattern.contains('/') && !pattern.starts_with('*') {
            globs.push(format!("*/{}", pattern));
        }
    }
    globs
}

/// Human-readable analysis report, printed in dry-run mode.
pub fn print_analysis(repo: &Path, plans: &[HistoryRewritePlan]) {
    eprintln!(
        "{} {}",
        "History analysis:".bold(),
        repo.display().to_string().yellow()
    );
    let mut unique: BTreeMap<&str, u64> = BTreeMap::new();
    for plan in plans.iter().filter(|p| !p.files.is_empty()) {
        eprintln!(
            "  {} ({} file(s), ~{:.2} MB)",
            plan.branch.cyan(),
            plan.files.len(),
            megabytes(plan.total_bytes())
        );
        for file in &plan.files {
            eprintln!(
                "    {} {} commit(s), ~{:.2} MB",
                file.path,
                file.commit_count,
                megabytes(file.approx_bytes)
            );
            let seen = unique.entry(file.path.as_str()).or_default();
            *seen = (*seen).max(file.approx_bytes);
        }
    }
    if unique.is_empty() {
        eprintln!("  {}", "no matching files in history".green());
        return;
    }
    eprintln!(
        "  {} unique file(s), estimated reduction ~{:.2} MB",
        unique.len().to_string().bold(),
        megabytes(unique.values().sum())
    );
    eprintln!(
        "  {}",
        "Re-run with --cleanup-history and without --cleanup-dry-run to rewrite.".dimmed()
    );
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
