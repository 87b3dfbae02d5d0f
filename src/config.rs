//! Resolved run configuration and the optional YAML config file.
//!
//! Command-line values always win; the config file under
//! `$XDG_CONFIG_HOME/gitlab-tools/config.yaml` only fills in what was not
//! given on the command line.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    gitlab::GitLabConfig,
    namespace::NamePolicy,
};

pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_MAX_PATH_LENGTH: usize = 240;
pub const DEFAULT_SHORT_NAME_LENGTH: usize = 32;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_COMMIT_MESSAGE: &str = "chore: cleanup unnecessary files";
pub const DEFAULT_CLEANUP_PATTERNS: &[&str] = &[
    "target/",
    "build/",
    "dist/",
    "out/",
    "node_modules/",
    "vendor/",
    "*.log",
    "*.tmp",
    "*.class",
    "*.jar",
];

/// Config file structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FileConfig {
    pub default_token: Option<String>,
    /// Host name (or base URL) to token.
    pub hosts: Option<HashMap<String, String>>,
    pub use_ssh: Option<bool>,
    pub cleanup_patterns: Option<Vec<String>>,
    pub cleanup_keep_patterns: Option<Vec<String>>,
    pub max_path_length: Option<usize>,
}

impl FileConfig {
    /// Load the config file if there is one. A missing file is not an error;
    /// a malformed one is.
    pub fn load() -> Result<Self> {
        let base_dirs = xdg::BaseDirectories::with_prefix(env!("CARGO_PKG_NAME"));
        match base_dirs.find_config_file(CONFIG_FILE) {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
        let config = Self::parse(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(?path, "Loaded config file");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    fn host_token(&self, base_url: &str) -> Option<&str> {
        let host = host_of(base_url);
        self.hosts
            .as_ref()?
            .iter()
            .find(|(key, _)| host_of(key) == host)
            .map(|(_, token)| token.as_str())
    }
}

fn host_of(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

/// Find the API token: flag, `GITLAB_TOKEN`, `GL_TOKEN`, host entry of the
/// config file, default token of the config file.
pub fn resolve_token(
    flag: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    file: &FileConfig,
    base_url: &str,
) -> Result<String> {
    if let Some(token) = flag
        && !token.trim().is_empty()
    {
        tracing::debug!("Using GitLab token from --token");
        return Ok(token.trim().to_string());
    }
    for var in ["GITLAB_TOKEN", "GL_TOKEN"] {
        if let Some(token) = env(var)
            && !token.trim().is_empty()
        {
            tracing::debug!("Using GitLab token from {} env var", var);
            return Ok(token.trim().to_string());
        }
    }
    if let Some(token) = file.host_token(base_url) {
        tracing::debug!("Using GitLab token from config file (host-specific)");
        return Ok(token.to_string());
    }
    if let Some(token) = &file.default_token {
        tracing::debug!("Using GitLab token from config file (default)");
        return Ok(token.clone());
    }
    Err(Error::Config(
        "no GitLab token: pass --token or set GITLAB_TOKEN".to_string(),
    ))
}

/// Require an http(s) URL and drop trailing slashes.
pub fn validate_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(Error::Config(format!(
            "GitLab URL must start with http:// or https://, got '{}'",
            url
        )));
    }
    if host_of(trimmed).is_empty() {
        return Err(Error::Config(format!("GitLab URL '{}' has no host", url)));
    }
    Ok(trimmed.to_string())
}

pub fn gitlab_config(url: &str, token: String) -> Result<GitLabConfig> {
    Ok(GitLabConfig {
        base_url: validate_url(url)?,
        token,
        timeout: DEFAULT_TIMEOUT,
    })
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub dry_run: bool,
    pub auto_commit: bool,
    pub history: bool,
    pub remove_patterns: Vec<String>,
    pub keep_patterns: Vec<String>,
    pub commit_message: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: false,
            auto_commit: false,
            history: false,
            remove_patterns: DEFAULT_CLEANUP_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            keep_patterns: Vec::new(),
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloneConfig {
    pub gitlab: GitLabConfig,
    /// Numeric id or full path of the root group.
    pub group: String,
    pub destination: PathBuf,
    pub use_ssh: bool,
    pub names: NamePolicy,
    pub max_path_length: usize,
    pub cleanup: CleanupConfig,
    pub json_report: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub gitlab: GitLabConfig,
    /// Numeric id or full path of the group to publish into.
    pub parent_group: String,
    pub source: PathBuf,
    pub use_ssh: bool,
    pub json_report: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    const YAML: &str = "
default_token: file-default
hosts:
  gitlab.example.com: file-host
use_ssh: false
cleanup_patterns: ['*.log']
max_path_length: 200
";

    #[test]
    fn test_parse_config_file() {
        let config = FileConfig::parse(YAML).unwrap();
        assert_eq!(config.default_token.as_deref(), Some("file-default"));
        assert_eq!(config.use_ssh, Some(false));
        assert_eq!(config.cleanup_patterns, Some(vec!["*.log".to_string()]));
        assert_eq!(config.max_path_length, Some(200));
        assert!(config.cleanup_keep_patterns.is_none());
    }

    #[test]
    fn test_empty_and_malformed_config() {
        assert!(FileConfig::parse("").unwrap().default_token.is_none());
        assert!(matches!(
            FileConfig::parse("hosts: [unclosed"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, YAML).unwrap();
        let config = FileConfig::from_path(&path).unwrap();
        assert_eq!(config.max_path_length, Some(200));
        assert!(matches!(
            FileConfig::from_path(&dir.path().join("missing.yaml")),
            Err(Error::Filesystem { .. })
        ));
    }

    #[test]
    fn test_token_precedence() {
        let file = FileConfig::parse(YAML).unwrap();
        let url = "https://gitlab.example.com";
        let env = |var: &str| match var {
            "GITLAB_TOKEN" => Some("env-gitlab".to_string()),
            "GL_TOKEN" => Some("env-gl".to_string()),
            _ => None,
        };
        let gl_only = |var: &str| (var == "GL_TOKEN").then(|| "env-gl".to_string());

        assert_eq!(resolve_token(Some("flag"), env, &file, url).unwrap(), "flag");
        assert_eq!(resolve_token(None, env, &file, url).unwrap(), "env-gitlab");
        assert_eq!(resolve_token(None, gl_only, &file, url).unwrap(), "env-gl");
        assert_eq!(resolve_token(None, no_env, &file, url).unwrap(), "file-host");
        assert_eq!(
            resolve_token(None, no_env, &file, "https://other.example.com").unwrap(),
            "file-default"
        );
        assert_eq!(resolve_token(Some("  "), no_env, &file, url).unwrap(), "file-host");
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let err = resolve_token(None, no_env, &FileConfig::default(), "https://x").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("https://gitlab.example.com/").unwrap(),
            "https://gitlab.example.com"
        );
        assert_eq!(
            validate_url("http://localhost:8080//").unwrap(),
            "http://localhost:8080"
        );
        assert!(matches!(validate_url("gitlab.example.com"), Err(Error::Config(_))));
        assert!(matches!(validate_url("https:///"), Err(Error::Config(_))));
    }

    #[test]
    fn test_cleanup_defaults() {
        let cleanup = CleanupConfig::default();
        assert!(!cleanup.enabled);
        assert_eq!(cleanup.remove_patterns.len(), 10);
        assert_eq!(cleanup.commit_message, DEFAULT_COMMIT_MESSAGE);
    }
}
