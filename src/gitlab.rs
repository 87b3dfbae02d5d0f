//! GitLab REST (v4) client for walking and building group hierarchies.
//!
//! The sync engine only sees the [`HostingApi`] trait; [`GitLabClient`] is the
//! blocking `ureq` implementation used by the binaries.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use ureq::Agent;

use crate::error::{Error, Result};

// ============== Configuration Types ==============

/// GitLab connection configuration
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    /// Base URL of the instance, without a trailing slash.
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl GitLabConfig {
    pub fn api_base(&self) -> String {
        format!("{}/api/v4", self.base_url)
    }

    /// Direct projects of a group, archived ones included.
    pub fn group_projects_url(&self, group_id: u64) -> String {
        format!(
            "{}/groups/{}/projects?include_subgroups=false",
            self.api_base(),
            group_id
        )
    }
}

// ============== API Response Types ==============

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub full_path: String,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub path_with_namespace: String,
    #[serde(default)]
    pub http_url_to_repo: Option<String>,
    #[serde(default)]
    pub ssh_url_to_repo: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateGroupRequest<'a> {
    name: &'a str,
    path: &'a str,
    parent_id: u64,
    visibility: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateProjectRequest<'a> {
    name: &'a str,
    path: &'a str,
    namespace_id: u64,
    visibility: &'a str,
    initialize_with_readme: bool,
}

/// Outcome of an idempotent create call.
#[derive(Debug)]
pub enum Creation<T> {
    Created(T),
    AlreadyExists(T),
    Failed(Error),
}

impl<T> Creation<T> {
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Created(value) | Self::AlreadyExists(value) => Ok(value),
            Self::Failed(error) => Err(error),
        }
    }
}

// ============== Hosting API ==============

/// The slice of the hosting API the tree walker needs.
pub trait HostingApi {
    /// Authentication probe; fails with [`Error::Authentication`] on a bad token.
    fn current_user(&self) -> Result<User>;
    /// Look up a group by numeric id or full path.
    fn get_group(&self, id_or_path: &str) -> Result<Group>;
    fn list_subgroups(&self, group_id: u64) -> Result<Vec<Group>>;
    /// Projects directly inside the group (subgroups not included).
    fn list_projects(&self, group_id: u64) -> Result<Vec<Project>>;
    fn post_group(&self, parent_id: u64, name: &str, path: &str) -> Result<Group>;
    fn post_project(&self, group_id: u64, name: &str, path: &str) -> Result<Project>;

    /// Return the subgroup of `parent_id` whose path is `path`, creating it
    /// when missing.
    fn create_group(&self, parent_id: u64, name: &str, path: &str) -> Creation<Group> {
        let find = || -> Result<Option<Group>> {
            Ok(self
                .list_subgroups(parent_id)?
                .into_iter()
                .find(|g| g.path == path))
        };
        match find() {
            Ok(Some(group)) => return Creation::AlreadyExists(group),
            Ok(None) => {}
            Err(error) => return Creation::Failed(error),
        }
        match self.post_group(parent_id, name, path) {
            Ok(group) => Creation::Created(group),
            // Lost a race with another creator, or the name was taken.
            Err(error @ Error::Api { status: 400 | 409, .. }) => match find() {
                Ok(Some(group)) => Creation::AlreadyExists(group),
                _ => Creation::Failed(error),
            },
            Err(error) => Creation::Failed(error),
        }
    }

    /// Return the project of `group_id` whose path is `path`, creating it
    /// when missing.
    fn create_project(&self, group_id: u64, name: &str, path: &str) -> Creation<Project> {
        let find = || -> Result<Option<Project>> {
            Ok(self
                .list_projects(group_id)?
                .into_iter()
                .find(|p| p.path == path))
        };
        match find() {
            Ok(Some(project)) => return Creation::AlreadyExists(project),
            Ok(None) => {}
            Err(error) => return Creation::Failed(error),
        }
        match self.post_project(group_id, name, path) {
            Ok(project) => Creation::Created(project),
            Err(error @ Error::Api { status: 400 | 409, .. }) => match find() {
                Ok(Some(project)) => Creation::AlreadyExists(project),
                _ => Creation::Failed(error),
            },
            Err(error) => Creation::Failed(error),
        }
    }
}

// ============== Client ==============

/// GitLab API client
pub struct GitLabClient {
    config: GitLabConfig,
    agent: Agent,
}

const PER_PAGE: usize = 100;

impl GitLabClient {
    pub fn new(config: GitLabConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build();
        Self {
            config,
            agent: Agent::new_with_config(agent_config),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!("GET {}", url);
        let mut response = self
            .agent
            .get(url)
            .header("PRIVATE-TOKEN", &self.config.token)
            .header("Accept", "application/json")
            .header("User-Agent", "gitlab-tools")
            .call()
            .map_err(|e| self.handle_ureq_error(e))?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| Error::api(0, format!("decoding response from {}: {}", url, e)))
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T> {
        tracing::debug!("POST {}", url);
        let mut response = self
            .agent
            .post(url)
            .header("PRIVATE-TOKEN", &self.config.token)
            .header("Accept", "application/json")
            .header("User-Agent", "gitlab-tools")
            .send_json(body)
            .map_err(|e| self.handle_ureq_error(e))?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| Error::api(0, format!("decoding response from {}: {}", url, e)))
    }

    /// Fetch every page of a list endpoint. `url` must already carry a query string.
    fn get_all_pages<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let paged = format!("{}&per_page={}&page={}", url, PER_PAGE, page);
            let items: Vec<T> = self.get_json(&paged)?;
            let count = items.len();
            all.extend(items);

            // If we got fewer than per_page results, we've reached the end
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    fn handle_ureq_error(&self, error: ureq::Error) -> Error {
        match error {
            ureq::Error::StatusCode(401) => Error::Authentication(
                "GitLab token is invalid or expired (HTTP 401)".to_string(),
            ),
            ureq::Error::StatusCode(status) => Error::api(status, status_message(status)),
            other => Error::api(0, format!("network error: {}", other)),
        }
    }
}

fn status_message(status: u16) -> &'static str {
    match status {
        400 => "bad request (name or path may already be taken)",
        403 => "forbidden",
        404 => "not found",
        409 => "conflict",
        429 => "rate limited",
        500..=599 => "server error",
        _ => "unexpected response",
    }
}

impl HostingApi for GitLabClient {
    fn current_user(&self) -> Result<User> {
        let url = format!("{}/user", self.config.api_base());
        self.get_json(&url).map_err(|e| match e {
            Error::Api { status: 403, .. } => {
                Error::Authentication("token lacks the read_api/api scope".to_string())
            }
            other => other,
        })
    }

    fn get_group(&self, id_or_path: &str) -> Result<Group> {
        let url = format!(
            "{}/groups/{}?with_projects=false",
            self.config.api_base(),
            encode_group_id(id_or_path)
        );
        self.get_json(&url)
    }

    fn list_subgroups(&self, group_id: u64) -> Result<Vec<Group>> {
        let url = format!(
            "{}/groups/{}/subgroups?all_available=true",
            self.config.api_base(),
            group_id
        );
        self.get_all_pages(&url)
    }

    fn list_projects(&self, group_id: u64) -> Result<Vec<Project>> {
        self.get_all_pages(&self.config.group_projects_url(group_id))
    }

    fn post_group(&self, parent_id: u64, name: &str, path: &str) -> Result<Group> {
        let url = format!("{}/groups", self.config.api_base());
        self.post_json(
            &url,
            &CreateGroupRequest {
                name,
                path,
                parent_id,
                visibility: "private",
            },
        )
    }

    fn post_project(&self, group_id: u64, name: &str, path: &str) -> Result<Project> {
        let url = format!("{}/projects", self.config.api_base());
        self.post_json(
            &url,
            &CreateProjectRequest {
                name,
                path,
                namespace_id: group_id,
                visibility: "private",
                initialize_with_readme: false,
            },
        )
    }
}

// ============== Helper Functions ==============

/// Numeric ids are used verbatim; full paths are percent-encoded as one segment.
pub fn encode_group_id(id_or_path: &str) -> String {
    let trimmed = id_or_path.trim().trim_matches('/');
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.to_string();
    }
    let mut encoded = String::with_capacity(trimmed.len());
    for byte in trimmed.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Embed a token into an HTTPS clone URL:
/// `https://host/g/p.git` → `https://oauth2:<token>@host/g/p.git`.
pub fn authenticated_url(http_url: &str, token: &str) -> String {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = http_url.strip_prefix(scheme) {
            // Drop any credentials already present.
            let rest = match rest.split_once('@') {
                Some((userinfo, host)) if !userinfo.contains('/') => host,
                _ => rest,
            };
            return format!("{}oauth2:{}@{}", scheme, token, rest);
        }
    }
    http_url.to_string()
}
