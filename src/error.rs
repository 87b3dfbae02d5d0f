//! Error taxonomy shared by the cloner, the publisher and the cleanup engine.
//!
//! Only [`Error::Authentication`] and [`Error::Config`] abort a run. Everything
//! else is caught at the node, repository or branch level and folded into the
//! [`Report`](crate::report::Report).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Token is missing, invalid or expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Listing or creation call against the hosting API failed.
    #[error("GitLab API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// clone/fetch/checkout/pull/push and friends.
    #[error("git {operation} failed: {message}")]
    GitOperation { operation: String, message: String },

    #[error("filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history rewrite failed: {0}")]
    HistoryRewrite(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GitOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// True for errors that must stop the whole run before traversal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Config(_))
    }
}

impl From<git2::Error> for Error {
    fn from(error: git2::Error) -> Self {
        Self::git("git2", error.message())
    }
}
