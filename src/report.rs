use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoOutcome {
    Created,
    Updated,
    Failed,
}

/// Per-branch counters for one repository
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BranchCounts {
    pub created: u64,
    pub updated: u64,
    pub up_to_date: u64,
    pub conflicts: u64,
    pub failed: u64,
    pub pushed: u64,
}

/// Cleanup totals for one repository, summed over its branches
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupTotals {
    pub branches: u64,
    pub matched: u64,
    pub removed: u64,
    pub failed: u64,
}

/// Everything recorded about one repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoRecord {
    pub path: PathBuf,
    pub name: String,
    pub outcome: RepoOutcome,
    pub branches: BranchCounts,
    pub cleanup: CleanupTotals,
    pub errors: Vec<String>,
}

impl RepoRecord {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, outcome: RepoOutcome) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            outcome,
            branches: BranchCounts::default(),
            cleanup: CleanupTotals::default(),
            errors: Vec::new(),
        }
    }

    pub fn failed(path: impl Into<PathBuf>, name: impl Into<String>, error: impl ToString) -> Self {
        let mut record = Self::new(path, name, RepoOutcome::Failed);
        record.errors.push(error.to_string());
        record
    }

    pub fn error(&mut self, error: impl ToString) {
        self.errors.push(error.to_string());
    }
}

/// A group-level failure (listing or creation) that is not tied to a single repository.
#[derive(Debug, Clone, Serialize)]
pub struct NodeError {
    pub node: String,
    pub message: String,
}

/// Aggregated outcome of a clone or publish run.
///
/// Append-only: one record per repository path, never overwritten.
#[derive(Debug, Serialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub groups_processed: u64,
    pub groups_created: u64,
    pub repositories: Vec<RepoRecord>,
    pub node_errors: Vec<NodeError>,
    #[serde(skip)]
    seen: HashSet<PathBuf>,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            groups_processed: 0,
            groups_created: 0,
            repositories: Vec::new(),
            node_errors: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Record a repository outcome. A second record for the same path is
    /// rejected and the first one kept.
    pub fn record(&mut self, record: RepoRecord) -> bool {
        if !self.seen.insert(record.path.clone()) {
            tracing::warn!(
                "Repository {} was already recorded; keeping the first result",
                record.path.display()
            );
            return false;
        }
        self.repositories.push(record);
        true
    }

    pub fn node_error(&mut self, node: impl Into<String>, error: impl ToString) {
        let node = node.into();
        let message = error.to_string();
        tracing::error!("{}: {}", node, message);
        self.node_errors.push(NodeError { node, message });
    }

    pub fn get(&self, path: &Path) -> Option<&RepoRecord> {
        self.repositories.iter().find(|r| r.path == path)
    }

    fn count(&self, outcome: RepoOutcome) -> usize {
        self.repositories
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    pub fn created(&self) -> usize {
        self.count(RepoOutcome::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(RepoOutcome::Updated)
    }

    pub fn failed(&self) -> usize {
        self.count(RepoOutcome::Failed)
    }

    /// Every recorded error, repository-, branch- and node-level.
    pub fn error_count(&self) -> usize {
        self.node_errors.len()
            + self
                .repositories
                .iter()
                .map(|r| r.errors.len())
                .sum::<usize>()
    }

    pub fn exit_code(&self) -> i32 {
        if self.error_count() == 0 { 0 } else { 1 }
    }

    fn branch_totals(&self) -> BranchCounts {
        let mut totals = BranchCounts::default();
        for record in &self.repositories {
            let b = &record.branches;
            totals.created += b.created;
            totals.updated += b.updated;
            totals.up_to_date += b.up_to_date;
            totals.conflicts += b.conflicts;
            totals.failed += b.failed;
            totals.pushed += b.pushed;
        }
        totals
    }

    fn cleanup_totals(&self) -> CleanupTotals {
        let mut totals = CleanupTotals::default();
        for record in &self.repositories {
            let c = &record.cleanup;
            totals.branches += c.branches;
            totals.matched += c.matched;
            totals.removed += c.removed;
            totals.failed += c.failed;
        }
        totals
    }

    /// Print the summary and the error listing to stderr
    pub fn print_summary(&self, title: &str) {
        let elapsed = Utc::now() - self.started_at;
        let branches = self.branch_totals();
        let cleanup = self.cleanup_totals();

        eprintln!();
        eprintln!("{}", format!("=== {} ===", title).yellow().bold());
        eprintln!();
        eprintln!("{:<24} {:>8}", "Groups processed", self.groups_processed);
        eprintln!("{:<24} {:>8}", "Groups created", self.groups_created);
        eprintln!("{}", "-".repeat(33));
        eprintln!("{:<24} {:>8}", "Repositories created", self.created().to_string().green());
        eprintln!("{:<24} {:>8}", "Repositories updated", self.updated().to_string().green());
        eprintln!("{:<24} {:>8}", "Repositories failed", self.failed().to_string().red());
        eprintln!("{}", "-".repeat(33));
        eprintln!("{:<24} {:>8}", "Branches created", branches.created);
        eprintln!("{:<24} {:>8}", "Branches updated", branches.updated);
        eprintln!("{:<24} {:>8}", "Branches up to date", branches.up_to_date);
        eprintln!("{:<24} {:>8}", "Branches pushed", branches.pushed);
        eprintln!("{:<24} {:>8}", "Branch conflicts", branches.conflicts.to_string().yellow());
        if cleanup.branches > 0 {
            eprintln!("{}", "-".repeat(33));
            eprintln!("{:<24} {:>8}", "Cleanup branches", cleanup.branches);
            eprintln!("{:<24} {:>8}", "Cleanup matched", cleanup.matched);
            eprintln!("{:<24} {:>8}", "Cleanup removed", cleanup.removed);
            eprintln!("{:<24} {:>8}", "Cleanup failures", cleanup.failed);
        }
        eprintln!("{}", "-".repeat(33));
        let errors = self.error_count();
        let errors_str = if errors == 0 {
            errors.to_string().green()
        } else {
            errors.to_string().red().bold()
        };
        eprintln!("{:<24} {:>8}", "ERRORS".bold(), errors_str);
        eprintln!("{:<24} {:>8}s", "Elapsed", elapsed.num_seconds());
        eprintln!();

        self.print_errors();
    }

    /// Error listing grouped by repository.
    pub fn print_errors(&self) {
        if self.error_count() == 0 {
            return;
        }
        eprintln!("{}", "Errors:".red().bold());
        for error in &self.node_errors {
            eprintln!("  {} {}", error.node.yellow(), "(group)".dimmed());
            eprintln!("    {} {}", "✗".red(), error.message);
        }
        for record in self.repositories.iter().filter(|r| !r.errors.is_empty()) {
            eprintln!("  {}", record.path.display().to_string().yellow());
            for error in &record.errors {
                eprintln!("    {} {}", "✗".red(), error);
            }
        }
        eprintln!();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> crate::error::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| crate::error::Error::fs(path, std::io::Error::other(e)))?;
        std::fs::write(path, json).map_err(|e| crate::error::Error::fs(path, e))?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }
}
