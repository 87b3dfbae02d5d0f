//! Progress display: step-by-step logging in normal mode, a spinner in quiet mode.

use indicatif::{ProgressBar, ProgressStyle};

use crate::report::{RepoOutcome, RepoRecord};

pub trait ProgressSink {
    fn group_started(&self, name: &str, depth: usize);
    fn repository_started(&self, name: &str);
    fn repository_finished(&self, record: &RepoRecord);
    fn finish(&self);
}

/// Normal mode: every step goes through tracing.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn group_started(&self, name: &str, depth: usize) {
        tracing::info!("Processing group: {} (depth {})", name, depth);
    }

    fn repository_started(&self, name: &str) {
        tracing::info!("Processing repository: {}", name);
    }

    fn repository_finished(&self, record: &RepoRecord) {
        match record.outcome {
            RepoOutcome::Failed => tracing::error!("{}: failed", record.path.display()),
            outcome if record.errors.is_empty() => {
                tracing::info!("{}: {:?}", record.path.display(), outcome)
            }
            outcome => tracing::warn!(
                "{}: {:?} with {} error(s)",
                record.path.display(),
                outcome,
                record.errors.len()
            ),
        }
    }

    fn finish(&self) {}
}

/// Quiet mode: a single spinner line that ticks once per repository.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} repositories {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn group_started(&self, name: &str, _depth: usize) {
        self.bar.set_message(name.to_string());
    }

    fn repository_started(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn repository_finished(&self, _record: &RepoRecord) {
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Pick the sink matching the `--quiet` flag.
pub fn for_mode(quiet: bool) -> Box<dyn ProgressSink> {
    if quiet {
        Box::new(BarProgress::new())
    } else {
        Box::new(LogProgress)
    }
}
