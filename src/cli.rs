//! Command-line arguments for both binaries and their resolution into run
//! configuration.

use std::path::PathBuf;

use clap::{Args, Parser};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{
        CleanupConfig, CloneConfig, DEFAULT_COMMIT_MESSAGE, DEFAULT_MAX_PATH_LENGTH,
        DEFAULT_SHORT_NAME_LENGTH, FileConfig, PublishConfig, gitlab_config, resolve_token,
    },
    error::{Error, Result},
    namespace::NamePolicy,
};

/// Flags shared by both binaries.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Base URL of the GitLab instance.
    #[arg(long, default_value = "https://gitlab.com")]
    pub gitlab_url: String,

    /// Personal access token (falls back to GITLAB_TOKEN, GL_TOKEN, then the config file).
    #[arg(long)]
    pub token: Option<String>,

    #[arg(long, short, help = "Enable verbose output", conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(long, short, help = "Only show a progress indicator and the final report")]
    pub quiet: bool,

    /// Also write the final report as JSON to this path.
    #[arg(long)]
    pub json_report: Option<PathBuf>,
}

impl CommonArgs {
    fn token(&self, file: &FileConfig) -> Result<String> {
        resolve_token(
            self.token.as_deref(),
            |var| std::env::var(var).ok(),
            file,
            &self.gitlab_url,
        )
    }
}

/// Clone every repository of a GitLab group tree, keeping all branches in sync.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CloneArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Root group: numeric id or full path.
    #[arg(long)]
    pub group: String,

    /// Local directory the group tree is mirrored into.
    #[arg(long)]
    pub destination: PathBuf,

    /// Clone over HTTPS with the token instead of SSH.
    #[arg(long)]
    pub use_https: bool,

    /// Shorten long directory names to a prefix plus a digest.
    #[arg(long)]
    pub use_short_paths: bool,

    /// Warn about local paths longer than this.
    #[arg(long)]
    pub max_path_length: Option<usize>,

    /// Remove build artifacts and dependencies from every branch.
    #[arg(long)]
    pub cleanup: bool,

    /// Report what cleanup would do without changing anything.
    #[arg(long)]
    pub cleanup_dry_run: bool,

    /// Commit and push the cleanup on each branch.
    #[arg(long)]
    pub cleanup_auto_commit: bool,

    /// Comma-separated remove patterns; a trailing `/` matches directories only.
    #[arg(long, value_delimiter = ',')]
    pub cleanup_patterns: Option<Vec<String>>,

    /// Comma-separated patterns that are never removed.
    #[arg(long, value_delimiter = ',')]
    pub cleanup_keep_patterns: Option<Vec<String>>,

    /// Also purge matching files from history (rewrites and force-pushes every branch).
    #[arg(long)]
    pub cleanup_history: bool,

    #[arg(long, default_value = DEFAULT_COMMIT_MESSAGE)]
    pub cleanup_commit_message: String,
}

impl CloneArgs {
    pub fn into_config(self, file: &FileConfig) -> Result<CloneConfig> {
        let token = self.common.token(file)?;
        let gitlab = gitlab_config(&self.common.gitlab_url, token)?;

        let any_cleanup_flag = self.cleanup_dry_run
            || self.cleanup_auto_commit
            || self.cleanup_history
            || self.cleanup_patterns.is_some()
            || self.cleanup_keep_patterns.is_some();
        if any_cleanup_flag && !self.cleanup {
            return Err(Error::Config(
                "cleanup options require --cleanup".to_string(),
            ));
        }
        let auto_commit = if self.cleanup_dry_run && self.cleanup_auto_commit {
            tracing::warn!("--cleanup-dry-run is set; ignoring --cleanup-auto-commit");
            false
        } else {
            self.cleanup_auto_commit
        };

        let defaults = CleanupConfig::default();
        let cleanup = CleanupConfig {
            enabled: self.cleanup,
            dry_run: self.cleanup_dry_run,
            auto_commit,
            history: self.cleanup_history,
            remove_patterns: self
                .cleanup_patterns
                .or_else(|| file.cleanup_patterns.clone())
                .unwrap_or(defaults.remove_patterns),
            keep_patterns: self
                .cleanup_keep_patterns
                .or_else(|| file.cleanup_keep_patterns.clone())
                .unwrap_or_default(),
            commit_message: self.cleanup_commit_message,
        };

        Ok(CloneConfig {
            gitlab,
            group: self.group,
            destination: self.destination,
            use_ssh: !self.use_https && file.use_ssh.unwrap_or(true),
            names: NamePolicy {
                short_names: self.use_short_paths.then_some(DEFAULT_SHORT_NAME_LENGTH),
            },
            max_path_length: self
                .max_path_length
                .or(file.max_path_length)
                .unwrap_or(DEFAULT_MAX_PATH_LENGTH),
            cleanup,
            json_report: self.common.json_report,
        })
    }
}

/// Publish a local directory tree of git repositories into a GitLab group.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct PublishArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Target group: numeric id or full path.
    #[arg(long)]
    pub group_id: String,

    /// Directory holding the repositories to publish.
    #[arg(long)]
    pub source: PathBuf,

    /// Push over SSH instead of HTTPS with the token.
    #[arg(long)]
    pub use_ssh: bool,
}

impl PublishArgs {
    pub fn into_config(self, file: &FileConfig) -> Result<PublishConfig> {
        let token = self.common.token(file)?;
        Ok(PublishConfig {
            gitlab: gitlab_config(&self.common.gitlab_url, token)?,
            parent_group: self.group_id,
            source: self.source,
            use_ssh: self.use_ssh || file.use_ssh.unwrap_or(false),
            json_report: self.common.json_report,
        })
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the flags.
pub fn init_logging(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}
