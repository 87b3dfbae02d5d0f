//! Per-branch removal of build artifacts and dependency directories.
//!
//! Cleanup is staged like the rest of the sync engine:
//! 1. Scan: walk the working tree and build a [`CleanupPlan`] (always runs)
//! 2. Execute: delete exactly the planned paths, extend the ignore file,
//!    untrack, and optionally commit and push (skipped in dry-run mode)

use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use globset::{Glob, GlobMatcher};
use serde::Serialize;
use walkdir::WalkDir;

use crate::{
    config::CleanupConfig,
    error::{Error, Result},
    git2_ops::DEFAULT_REMOTE,
    reconcile::BranchHook,
    vcs::Vcs,
};

pub const IGNORE_FILE: &str = ".gitignore";

/// One remove or keep pattern. A trailing `/` scopes it to directories.
#[derive(Debug, Clone)]
pub struct CleanupPattern {
    pub glob: String,
    pub is_directory: bool,
    matcher: GlobMatcher,
}

impl CleanupPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let glob = raw.trim().to_string();
        let is_directory = glob.ends_with('/');
        let stem = glob.trim_end_matches('/');
        if stem.is_empty() {
            return Err(Error::Config(format!("empty cleanup pattern '{}'", raw)));
        }
        let matcher = Glob::new(stem)
            .map_err(|e| Error::Config(format!("invalid cleanup pattern '{}': {}", raw, e)))?
            .compile_matcher();
        Ok(Self {
            glob,
            is_directory,
            matcher,
        })
    }

    /// `rel` is the `/`-separated path relative to the repository root.
    pub fn matches(&self, rel: &str, is_dir: bool) -> bool {
        if self.is_directory && !is_dir {
            return false;
        }
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.matcher.is_match(rel) || self.matcher.is_match(name)
    }
}

/// Remove patterns and keep patterns; keep always wins.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    pub remove: Vec<CleanupPattern>,
    pub keep: Vec<CleanupPattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(remove: &[S], keep: &[S]) -> Result<Self> {
        let parse = |patterns: &[S]| -> Result<Vec<CleanupPattern>> {
            patterns
                .iter()
                .map(|p| p.as_ref().trim())
                .filter(|p| !p.is_empty())
                .map(CleanupPattern::parse)
                .collect()
        };
        Ok(Self {
            remove: parse(remove)?,
            keep: parse(keep)?,
        })
    }

    pub fn is_removed(&self, rel: &str, is_dir: bool) -> bool {
        self.remove.iter().any(|p| p.matches(rel, is_dir))
    }

    /// Kept if the path itself or any directory above it matches a keep pattern.
    pub fn is_protected(&self, rel: &Path, is_dir: bool) -> bool {
        if self.keep.is_empty() {
            return false;
        }
        if self.is_kept(&to_slash(rel), is_dir) {
            return true;
        }
        rel.ancestors()
            .skip(1)
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| self.is_kept(&to_slash(a), true))
    }

    fn is_kept(&self, rel: &str, is_dir: bool) -> bool {
        self.keep.iter().any(|p| p.matches(rel, is_dir))
    }

    /// File-scoped remove patterns; directory patterns never take part in
    /// history rewriting.
    pub fn file_patterns(&self) -> Vec<String> {
        self.remove
            .iter()
            .filter(|p| !p.is_directory)
            .map(|p| p.glob.clone())
            .collect()
    }
}

/// What a cleanup pass would do on one branch. Produced by [`CleanupEngine::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPlan {
    pub branch: String,
    pub scanned: usize,
    /// Relative paths; a matched directory is removed as a whole.
    pub matched: Vec<PathBuf>,
    /// Remove patterns not yet listed in the ignore file.
    pub ignore_additions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CommitStatus {
    /// Auto-commit disabled or dry-run.
    Skipped,
    NothingToCommit,
    Pushed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub branch: String,
    pub scanned: usize,
    pub matched: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub commit: CommitStatus,
}

impl CleanupOutcome {
    fn from_plan(plan: &CleanupPlan) -> Self {
        Self {
            branch: plan.branch.clone(),
            scanned: plan.scanned,
            matched: plan.matched.clone(),
            removed: Vec::new(),
            failed: Vec::new(),
            commit: CommitStatus::Skipped,
        }
    }

    fn scan_failed(branch: &str, error: Error) -> Self {
        Self {
            branch: branch.to_string(),
            scanned: 0,
            matched: Vec::new(),
            removed: Vec::new(),
            failed: vec![(PathBuf::from("."), error.to_string())],
            commit: CommitStatus::Skipped,
        }
    }
}

pub struct CleanupEngine<'a, V: Vcs + ?Sized> {
    vcs: &'a V,
    patterns: PatternSet,
    dry_run: bool,
    auto_commit: bool,
    commit_message: String,
}

impl<'a, V: Vcs + ?Sized> CleanupEngine<'a, V> {
    pub fn new(vcs: &'a V, config: &CleanupConfig) -> Result<Self> {
        Ok(Self {
            vcs,
            patterns: PatternSet::new(&config.remove_patterns, &config.keep_patterns)?,
            dry_run: config.dry_run,
            auto_commit: config.auto_commit,
            commit_message: config.commit_message.clone(),
        })
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Scan, then execute unless in dry-run mode.
    pub fn cleanup(&self, repo: &Path, branch: &str) -> CleanupOutcome {
        tracing::info!("[CLEANUP] Scanning {} on branch '{}'", repo.display(), branch);
        let plan = match self.scan(repo, branch) {
            Ok(plan) => plan,
            Err(error) => {
                tracing::error!("[CLEANUP] Scan of {} failed: {}", repo.display(), error);
                return CleanupOutcome::scan_failed(branch, error);
            }
        };
        tracing::info!(
            "[CLEANUP] Scan complete: {} entries scanned, {} matched",
            plan.scanned,
            plan.matched.len()
        );
        if self.dry_run {
            for path in &plan.matched {
                tracing::info!("[DRY-RUN] Would remove {}", path.display());
            }
            for pattern in &plan.ignore_additions {
                tracing::info!("[DRY-RUN] Would add '{}' to {}", pattern, IGNORE_FILE);
            }
            return CleanupOutcome::from_plan(&plan);
        }
        self.execute(repo, &plan)
    }

    /// Read-only walk of the working tree.
    pub fn scan(&self, repo: &Path, branch: &str) -> Result<CleanupPlan> {
        let mut scanned = 0;
        let mut matched = Vec::new();
        // Matched directories that hold kept entries: their other contents
        // are removed one by one instead of the directory as a whole.
        let mut split_dirs: Vec<PathBuf> = Vec::new();

        let mut it = WalkDir::new(repo)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = it.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!("[CLEANUP] Skipping unreadable entry: {}", error);
                    continue;
                }
            };
            let is_dir = entry.file_type().is_dir();
            if entry.file_name() == ".git" {
                if is_dir {
                    it.skip_current_dir();
                }
                continue;
            }
            scanned += 1;

            let rel = entry
                .path()
                .strip_prefix(repo)
                .map_err(|_| Error::fs(entry.path(), std::io::Error::other("outside repository")))?
                .to_path_buf();
            let inherited = split_dirs.iter().any(|dir| rel.starts_with(dir));
            if !inherited && !self.patterns.is_removed(&to_slash(&rel), is_dir) {
                continue;
            }
            if self.patterns.is_protected(&rel, is_dir) {
                tracing::debug!("[CLEANUP] Keeping {} (keep pattern)", rel.display());
                if is_dir {
                    it.skip_current_dir();
                }
                continue;
            }
            if is_dir {
                if self.has_protected_descendant(entry.path(), &rel) {
                    split_dirs.push(rel);
                    continue;
                }
                it.skip_current_dir();
            }
            tracing::debug!("[CLEANUP] Match: {}", rel.display());
            matched.push(rel);
        }

        Ok(CleanupPlan {
            branch: branch.to_string(),
            scanned,
            matched,
            ignore_additions: self.ignore_additions(repo)?,
        })
    }

    fn has_protected_descendant(&self, dir: &Path, rel_dir: &Path) -> bool {
        if self.patterns.keep.is_empty() {
            return false;
        }
        WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| {
                let rel = rel_dir.join(e.path().strip_prefix(dir).unwrap_or(e.path()));
                self.patterns.is_protected(&rel, e.file_type().is_dir())
            })
    }

    fn ignore_additions(&self, repo: &Path) -> Result<Vec<String>> {
        let path = repo.join(IGNORE_FILE);
        let existing = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::fs(path, e)),
        };
        let mut listed: HashSet<&str> = existing.lines().map(str::trim).collect();
        let mut additions = Vec::new();
        for pattern in &self.patterns.remove {
            if listed.insert(pattern.glob.as_str()) {
                additions.push(pattern.glob.clone());
            }
        }
        Ok(additions)
    }

    /// Carry out a plan produced by [`Self::scan`].
    pub fn execute(&self, repo: &Path, plan: &CleanupPlan) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::from_plan(plan);

        for rel in &plan.matched {
            let path = repo.join(rel);
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    tracing::info!("[REMOVED] {}", rel.display());
                    outcome.removed.push(rel.clone());
                }
                Err(error) => {
                    tracing::warn!("[CLEANUP] Failed to remove {}: {}", rel.display(), error);
                    outcome.failed.push((rel.clone(), error.to_string()));
                }
            }
        }

        if !plan.ignore_additions.is_empty() {
            match append_ignore_patterns(repo, &plan.ignore_additions) {
                Ok(()) => tracing::info!(
                    "[GITIGNORE] Added {} pattern(s) to {}",
                    plan.ignore_additions.len(),
                    IGNORE_FILE
                ),
                Err(error) => {
                    tracing::warn!("[GITIGNORE] Failed to update {}: {}", IGNORE_FILE, error);
                    outcome
                        .failed
                        .push((PathBuf::from(IGNORE_FILE), error.to_string()));
                }
            }
        }

        if let Err(error) = self.vcs.untrack(repo, &outcome.removed) {
            tracing::warn!("[GIT-CACHE] Failed to untrack removed paths: {}", error);
        }

        if self.auto_commit {
            outcome.commit = self.commit_and_push(repo, &plan.branch);
        }
        outcome
    }

    fn commit_and_push(&self, repo: &Path, branch: &str) -> CommitStatus {
        let result = self.vcs.stage_all(repo).and_then(|()| {
            if !self.vcs.commit(repo, &self.commit_message)? {
                return Ok(CommitStatus::NothingToCommit);
            }
            self.vcs.push(repo, DEFAULT_REMOTE, branch, false)?;
            Ok(CommitStatus::Pushed)
        });
        match result {
            Ok(status) => {
                tracing::info!("[CLEANUP] Branch '{}': {:?}", branch, status);
                status
            }
            Err(error) => {
                tracing::error!("[CLEANUP] Commit/push of '{}' failed: {}", branch, error);
                CommitStatus::Failed(error.to_string())
            }
        }
    }
}

impl<V: Vcs + ?Sized> BranchHook for CleanupEngine<'_, V> {
    fn on_branch_ready(&mut self, repo: &Path, branch: &str) -> Option<CleanupOutcome> {
        Some(self.cleanup(repo, branch))
    }

    fn leaves_changes(&self) -> bool {
        !self.dry_run && !self.auto_commit
    }
}

fn append_ignore_patterns(repo: &Path, patterns: &[String]) -> std::io::Result<()> {
    let path = repo.join(IGNORE_FILE);
    let needs_newline = match fs::read(&path) {
        Ok(bytes) => !bytes.is_empty() && !bytes.ends_with(b"\n"),
        Err(_) => false,
    };
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    if needs_newline {
        writeln!(file)?;
    }
    for pattern in patterns {
        writeln!(file, "{}", pattern)?;
    }
    Ok(())
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::testing::FakeVcs;

    fn config(remove: &[&str], keep: &[&str], dry_run: bool) -> CleanupConfig {
        CleanupConfig {
            enabled: true,
            dry_run,
            remove_patterns: remove.iter().map(|s| s.to_string()).collect(),
            keep_patterns: keep.iter().map(|s| s.to_string()).collect(),
            ..CleanupConfig::default()
        }
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn sample_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "build/output.bin", "bin");
        write(dir.path(), "app.log", "log");
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main");
        write(dir.path(), ".git/logs/debug.log", "must not be touched");
        dir
    }

    #[test]
    fn test_pattern_directory_scope() {
        let dir = CleanupPattern::parse("build/").unwrap();
        assert!(dir.is_directory);
        assert!(dir.matches("build", true));
        assert!(dir.matches("sub/build", true));
        assert!(!dir.matches("build", false));

        let file = CleanupPattern::parse("*.log").unwrap();
        assert!(!file.is_directory);
        assert!(file.matches("app.log", false));
        assert!(file.matches("logs/deep/app.log", false));
        assert!(!file.matches("app.rs", false));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(matches!(
            CleanupPattern::parse("[unclosed"),
            Err(Error::Config(_))
        ));
        assert!(matches!(CleanupPattern::parse("/"), Err(Error::Config(_))));
    }

    #[test]
    fn test_dry_run_reports_without_mutating() {
        let dir = sample_repo();
        let vcs = FakeVcs::new();
        let engine = CleanupEngine::new(&vcs, &config(&["build/", "*.log"], &[], true)).unwrap();

        let outcome = engine.cleanup(dir.path(), "main");

        assert_eq!(
            outcome.matched,
            vec![PathBuf::from("app.log"), PathBuf::from("build")]
        );
        assert!(outcome.removed.is_empty());
        assert!(dir.path().join("build/output.bin").exists());
        assert!(dir.path().join("app.log").exists());
        assert!(!dir.path().join(IGNORE_FILE).exists());
        assert!(vcs.calls().iter().all(|c| !c.starts_with("untrack")));
    }

    #[test]
    fn test_real_run_removes_and_extends_ignore_file() {
        let dir = sample_repo();
        let vcs = FakeVcs::new();
        let engine = CleanupEngine::new(&vcs, &config(&["build/", "*.log"], &[], false)).unwrap();

        let outcome = engine.cleanup(dir.path(), "main");

        assert_eq!(outcome.matched.len(), 2);
        assert_eq!(outcome.removed.len(), 2);
        assert!(outcome.failed.is_empty());
        assert!(!dir.path().join("build").exists());
        assert!(!dir.path().join("app.log").exists());
        assert!(dir.path().join("src/main.rs").exists());
        assert!(dir.path().join(".git/logs/debug.log").exists());

        let ignore = fs::read_to_string(dir.path().join(IGNORE_FILE)).unwrap();
        assert_eq!(ignore.lines().collect::<Vec<_>>(), vec!["build/", "*.log"]);
        assert!(vcs.calls().iter().any(|c| c.starts_with("untrack")));
        assert_eq!(outcome.commit, CommitStatus::Skipped);
    }

    #[test]
    fn test_ignore_file_is_deduplicated() {
        let dir = sample_repo();
        write(dir.path(), IGNORE_FILE, "target/\n*.log");
        let vcs = FakeVcs::new();
        let engine =
            CleanupEngine::new(&vcs, &config(&["target/", "*.log", "*.tmp"], &[], false)).unwrap();

        engine.cleanup(dir.path(), "main");
        engine.cleanup(dir.path(), "main");

        let ignore = fs::read_to_string(dir.path().join(IGNORE_FILE)).unwrap();
        assert_eq!(ignore.lines().collect::<Vec<_>>(), vec!["target/", "*.log", "*.tmp"]);
    }

    #[test]
    fn test_keep_wins_over_remove() {
        let dir = sample_repo();
        write(dir.path(), "important.log", "keep me");
        write(dir.path(), "build/keep/config.json", "{}");
        write(dir.path(), "build/tmp/junk.o", "junk");
        let vcs = FakeVcs::new();
        let engine = CleanupEngine::new(
            &vcs,
            &config(&["build/", "*.log"], &["important.log", "build/keep/"], false),
        )
        .unwrap();

        let outcome = engine.cleanup(dir.path(), "main");

        assert!(dir.path().join("important.log").exists());
        assert!(dir.path().join("build/keep/config.json").exists());
        assert!(!dir.path().join("build/tmp").exists());
        assert!(!dir.path().join("build/output.bin").exists());
        assert!(!dir.path().join("app.log").exists());
        assert!(!outcome.removed.contains(&PathBuf::from("important.log")));
    }

    #[test]
    fn test_keep_precedence_for_every_pattern_pair() {
        let files = ["a.log", "b.tmp", "c.class", "d.jar", "nested/e.log"];
        let patterns = ["*.log", "*.tmp", "*.class", "*.jar", "nested/*"];
        for remove in patterns {
            for keep in patterns {
                let dir = TempDir::new().unwrap();
                for file in files {
                    write(dir.path(), file, "x");
                }
                let vcs = FakeVcs::new();
                let engine = CleanupEngine::new(&vcs, &config(&[remove], &[keep], false)).unwrap();
                let outcome = engine.cleanup(dir.path(), "main");
                let keep_pattern = CleanupPattern::parse(keep).unwrap();
                for removed in &outcome.removed {
                    assert!(
                        !keep_pattern.matches(&to_slash(removed), false),
                        "{} removed despite keep {}",
                        removed.display(),
                        keep
                    );
                }
            }
        }
    }

    #[test]
    fn test_auto_commit_pushes_current_branch() {
        let dir = sample_repo();
        let vcs = FakeVcs::new();
        let mut cfg = config(&["*.log"], &[], false);
        cfg.auto_commit = true;
        cfg.commit_message = "chore: prune".to_string();
        let engine = CleanupEngine::new(&vcs, &cfg).unwrap();

        let outcome = engine.cleanup(dir.path(), "develop");

        assert_eq!(outcome.commit, CommitStatus::Pushed);
        let calls = vcs.calls();
        assert!(calls.contains(&"commit chore: prune".to_string()));
        assert!(calls.contains(&"push origin develop".to_string()));
    }

    #[test]
    fn test_push_failure_is_recorded_not_fatal() {
        let dir = sample_repo();
        let vcs = FakeVcs::new();
        vcs.fail_push("develop");
        let mut cfg = config(&["*.log"], &[], false);
        cfg.auto_commit = true;
        let engine = CleanupEngine::new(&vcs, &cfg).unwrap();

        let outcome = engine.cleanup(dir.path(), "develop");

        assert!(matches!(outcome.commit, CommitStatus::Failed(_)));
        assert_eq!(outcome.removed, vec![PathBuf::from("app.log")]);
    }

    #[test]
    fn test_file_patterns_exclude_directories() {
        let set = PatternSet::new(&["build/", "*.jar", "node_modules/", "*.log"], &[]).unwrap();
        assert_eq!(set.file_patterns(), vec!["*.jar", "*.log"]);
    }
}
