use std::{path::Path, process::Command};

use crate::error::{Error, Result};

pub struct GitOutput {
    pub(crate) stdout: String,
}

impl AsRef<str> for GitOutput {
    fn as_ref(&self) -> &str {
        &self.stdout
    }
}

/// Run `git <args>` inside `dir`, failing on a non-zero exit status.
///
/// The error carries git's stderr so it can be surfaced in the final report.
pub(crate) fn run_git(dir: &Path, args: &[&str]) -> Result<GitOutput> {
    let printable = redact_credentials(&args.join(" "));
    tracing::debug!("Running `git {}` in {}", printable, dir.display());
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::git(operation_name(args), format!("running git {printable}: {e}")))?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(Error::git(
            operation_name(args),
            format!(
                "git {} exited with {}: {}",
                printable,
                out.status,
                redact_credentials(stderr.trim())
            ),
        ));
    }
    Ok(GitOutput {
        stdout: String::from_utf8_lossy(&out.stdout).trim().to_string(),
    })
}

/// Like [`run_git`] but reports the exit status as a bool instead of an error.
pub(crate) fn run_git_ok(dir: &Path, args: &[&str]) -> Result<bool> {
    tracing::debug!("Running `git {}`", redact_credentials(&args.join(" ")));
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::git(operation_name(args), e.to_string()))?
        .status;
    Ok(status.success())
}

fn operation_name(args: &[&str]) -> String {
    args.iter()
        .find(|arg| !arg.starts_with('-') && !arg.contains('='))
        .copied()
        .unwrap_or("git")
        .to_string()
}

/// Replace any `user:secret@` userinfo in URLs with `***@`.
pub fn redact_credentials(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("://") {
        let (head, tail) = rest.split_at(pos + 3);
        result.push_str(head);
        let end = tail
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(tail.len());
        match tail[..end].rfind('@') {
            Some(at) => {
                result.push_str("***");
                rest = &tail[at..];
            }
            None => rest = tail,
        }
    }
    result.push_str(rest);
    result
}
