//! Maps group/project names onto filesystem paths and remote paths.

use std::path::{Path, PathBuf};

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];
const PLACEHOLDER: &str = "unnamed";

/// Length kept from the original name when shortening; the rest is a digest.
const SHORT_PREFIX_LEN: usize = 16;
const SHORT_DIGEST_LEN: usize = 8;

/// Make a group or project name safe to use as a directory name.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect();
    // Other trailing whitespace (tabs, nbsp) is stripped along with dots and
    // spaces so the result is a fixed point of this function.
    let mut stripped = replaced.as_str();
    loop {
        let next = stripped.trim_end_matches(['.', ' ']).trim_end();
        if next == stripped {
            break;
        }
        stripped = next;
    }
    if stripped.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        stripped.to_string()
    }
}

/// Deterministically shorten an already-sanitized name that is longer than
/// `max_len`, keeping a readable prefix and an md5 fragment of the full name.
pub fn shorten(safe_name: &str, max_len: usize) -> String {
    if safe_name.chars().count() <= max_len {
        return safe_name.to_string();
    }
    let digest = format!("{:x}", md5::compute(safe_name.as_bytes()));
    let prefix: String = safe_name.chars().take(SHORT_PREFIX_LEN).collect();
    let prefix = prefix.trim_end_matches(['.', ' ', '-', '_']);
    format!("{}-{}", prefix, &digest[..SHORT_DIGEST_LEN])
}

/// Local directory for a child node.
pub fn resolve_local_path(parent: &Path, safe_name: &str) -> PathBuf {
    parent.join(safe_name)
}

/// URL path segment GitLab will accept for a group or project created from a
/// local directory name.
pub fn remote_slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' => '-',
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '-',
        })
        .collect();
    let slug = slug.trim_matches(['-', '.']);
    if slug.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        slug.to_string()
    }
}

/// Full remote path of a child under `parent_full_path`.
pub fn resolve_remote_path(parent_full_path: &str, name: &str) -> String {
    let slug = remote_slug(name);
    if parent_full_path.is_empty() {
        slug
    } else {
        format!("{}/{}", parent_full_path.trim_end_matches('/'), slug)
    }
}

/// Logs a warning when `path` is longer than `max_len` characters.
pub fn check_path_length(path: &Path, max_len: usize) -> bool {
    let len = path.as_os_str().len();
    if len > max_len {
        tracing::warn!(
            "Path is {} characters long (limit {}): {}. Consider --use-short-paths or a shorter destination.",
            len,
            max_len,
            path.display()
        );
        false
    } else {
        true
    }
}

/// Local name policy: sanitize, then optionally shorten.
#[derive(Debug, Clone, Copy)]
pub struct NamePolicy {
    pub short_names: Option<usize>,
}

impl NamePolicy {
    pub fn local_name(&self, name: &str) -> String {
        let safe = sanitize(name);
        match self.short_names {
            Some(max) => shorten(&safe, max),
            None => safe,
        }
    }
}
