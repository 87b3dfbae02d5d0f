//! Mirror repositories between a local directory tree and a GitLab group
//! hierarchy, with optional per-branch cleanup and history purging.

pub mod cleanup;
pub mod cli;
pub mod cloner;
pub mod config;
pub mod error;
pub mod git;
pub mod git2_ops;
pub mod gitlab;
pub mod history;
pub mod namespace;
pub mod progress;
pub mod publisher;
pub mod reconcile;
pub mod report;
pub mod vcs;
pub mod walker;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
