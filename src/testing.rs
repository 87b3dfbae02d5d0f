//! In-memory stand-ins for [`Vcs`] and [`HostingApi`] used by unit tests.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    git2_ops::{ChangedBlob, DEFAULT_REMOTE, Head},
    gitlab::{Group, HostingApi, Project, User},
    namespace::remote_slug,
    vcs::{PullOutcome, Vcs},
};

#[derive(Debug, Clone)]
struct FakeRepo {
    head: Head,
    local: BTreeMap<String, String>,
    remote: Vec<(String, String)>,
    origin: Option<String>,
    bare: bool,
    blobs: HashMap<String, Vec<ChangedBlob>>,
}

/// A git stand-in keyed by repository path. Remote "servers" are keyed by URL;
/// `clone_repo` and `fetch_all` copy their branch lists.
#[derive(Default)]
pub struct FakeVcs {
    repos: RefCell<BTreeMap<PathBuf, FakeRepo>>,
    servers: RefCell<HashMap<String, Vec<(String, String)>>>,
    calls: RefCell<Vec<String>>,
    failing_clones: RefCell<HashSet<String>>,
    failing_fetches: RefCell<HashSet<PathBuf>>,
    failing_checkouts: RefCell<HashSet<String>>,
    failing_pushes: RefCell<HashSet<String>>,
    diverged: RefCell<HashSet<String>>,
    rewrite_error: RefCell<Option<String>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self, url: &str, branches: &[(&str, &str)]) {
        self.servers.borrow_mut().insert(url.to_string(), owned(branches));
    }

    /// Register a working copy on disk (a `.git` directory is created) whose
    /// head is the first local branch.
    pub fn add_repo(
        &self,
        path: &Path,
        origin: Option<&str>,
        local: &[(&str, &str)],
        remote: &[(&str, &str)],
    ) {
        let _ = fs::create_dir_all(path.join(".git"));
        let head = match local.first() {
            Some((name, _)) => Head::Branch(name.to_string()),
            None => Head::Unborn("main".to_string()),
        };
        self.repos.borrow_mut().insert(
            path.to_path_buf(),
            FakeRepo {
                head,
                local: owned(local).into_iter().collect(),
                remote: owned(remote),
                origin: origin.map(str::to_string),
                bare: false,
                blobs: HashMap::new(),
            },
        );
    }

    pub fn set_head(&self, path: &Path, head: Head) {
        if let Some(repo) = self.repos.borrow_mut().get_mut(path) {
            repo.head = head;
        }
    }

    pub fn set_bare(&self, path: &Path) {
        if let Some(repo) = self.repos.borrow_mut().get_mut(path) {
            repo.bare = true;
        }
    }

    pub fn set_blobs(&self, path: &Path, branch: &str, blobs: Vec<ChangedBlob>) {
        if let Some(repo) = self.repos.borrow_mut().get_mut(path) {
            repo.blobs.insert(branch.to_string(), blobs);
        }
    }

    pub fn fail_clone(&self, url: &str) {
        self.failing_clones.borrow_mut().insert(url.to_string());
    }

    pub fn fail_fetch(&self, path: &Path) {
        self.failing_fetches.borrow_mut().insert(path.to_path_buf());
    }

    pub fn fail_checkout(&self, target: &str) {
        self.failing_checkouts.borrow_mut().insert(target.to_string());
    }

    pub fn fail_push(&self, branch: &str) {
        self.failing_pushes.borrow_mut().insert(branch.to_string());
    }

    pub fn diverge(&self, branch: &str) {
        self.diverged.borrow_mut().insert(branch.to_string());
    }

    pub fn fail_rewrite(&self, message: &str) {
        *self.rewrite_error.borrow_mut() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn head_of(&self, path: &Path) -> Option<Head> {
        self.repos.borrow().get(path).map(|r| r.head.clone())
    }

    pub fn local_of(&self, path: &Path) -> Vec<String> {
        self.repos
            .borrow()
            .get(path)
            .map(|r| r.local.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn origin_of(&self, path: &Path) -> Option<String> {
        self.repos.borrow().get(path).and_then(|r| r.origin.clone())
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn with_repo<T>(&self, path: &Path, f: impl FnOnce(&mut FakeRepo) -> Result<T>) -> Result<T> {
        let mut repos = self.repos.borrow_mut();
        let repo = repos.get_mut(path).ok_or_else(|| {
            Error::git("open", format!("{} is not a git repository", path.display()))
        })?;
        f(repo)
    }
}

fn owned(branches: &[(&str, &str)]) -> Vec<(String, String)> {
    branches
        .iter()
        .map(|(name, sha)| (name.to_string(), sha.to_string()))
        .collect()
}

impl Vcs for FakeVcs {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        self.log(format!("clone {}", url));
        if self.failing_clones.borrow().contains(url) {
            return Err(Error::git("clone", "repository not found"));
        }
        fs::create_dir_all(dest.join(".git")).map_err(|e| Error::fs(dest, e))?;
        let remote = self.servers.borrow().get(url).cloned().unwrap_or_default();
        let default = remote
            .iter()
            .find(|(name, _)| name == "main")
            .or_else(|| remote.first())
            .cloned();
        let (head, local) = match default {
            Some((name, sha)) => (Head::Branch(name.clone()), BTreeMap::from([(name, sha)])),
            None => (Head::Unborn("main".to_string()), BTreeMap::new()),
        };
        self.repos.borrow_mut().insert(
            dest.to_path_buf(),
            FakeRepo {
                head,
                local,
                remote,
                origin: Some(url.to_string()),
                bare: false,
                blobs: HashMap::new(),
            },
        );
        Ok(())
    }

    fn is_bare(&self, repo: &Path) -> Result<bool> {
        self.with_repo(repo, |r| Ok(r.bare))
    }

    fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>> {
        self.with_repo(repo, |r| {
            Ok(if remote == DEFAULT_REMOTE { r.origin.clone() } else { None })
        })
    }

    fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<()> {
        self.log(format!("set-url {} {}", remote, url));
        self.with_repo(repo, |r| {
            r.origin = Some(url.to_string());
            Ok(())
        })
    }

    fn fetch_all(&self, repo: &Path, remote: &str) -> Result<()> {
        self.log(format!("fetch {}", remote));
        if self.failing_fetches.borrow().contains(repo) {
            return Err(Error::git("fetch", "could not read from remote repository"));
        }
        let servers = self.servers.borrow();
        self.with_repo(repo, |r| {
            let origin = r
                .origin
                .clone()
                .ok_or_else(|| Error::git("fetch", "no such remote"))?;
            if let Some(branches) = servers.get(&origin) {
                r.remote = branches.clone();
            }
            Ok(())
        })
    }

    fn head(&self, repo: &Path) -> Result<Head> {
        self.with_repo(repo, |r| Ok(r.head.clone()))
    }

    fn local_branches(&self, repo: &Path) -> Result<Vec<String>> {
        self.with_repo(repo, |r| Ok(r.local.keys().cloned().collect()))
    }

    fn remote_branches(&self, repo: &Path, _remote: &str) -> Result<Vec<(String, String)>> {
        self.with_repo(repo, |r| Ok(r.remote.clone()))
    }

    fn checkout(&self, repo: &Path, target: &str) -> Result<()> {
        self.log(format!("checkout {}", target));
        if self.failing_checkouts.borrow().contains(target) {
            return Err(Error::git("checkout", "local changes would be overwritten"));
        }
        self.with_repo(repo, |r| {
            if r.local.contains_key(target) {
                r.head = Head::Branch(target.to_string());
            } else if r.local.values().any(|sha| sha == target)
                || r.remote.iter().any(|(_, sha)| sha == target)
            {
                r.head = Head::Detached(target.to_string());
            } else {
                return Err(Error::git("checkout", format!("pathspec '{}' did not match", target)));
            }
            Ok(())
        })
    }

    fn create_tracking_branch(&self, repo: &Path, name: &str, remote_ref: &str) -> Result<()> {
        self.log(format!("track {} {}", name, remote_ref));
        if self.failing_checkouts.borrow().contains(name) {
            return Err(Error::git("checkout", "local changes would be overwritten"));
        }
        self.with_repo(repo, |r| {
            let sha = r
                .remote
                .iter()
                .find(|(branch, _)| remote_ref.ends_with(&format!("/{}", branch)))
                .map(|(_, sha)| sha.clone())
                .ok_or_else(|| Error::git("checkout", format!("unknown ref {}", remote_ref)))?;
            r.local.insert(name.to_string(), sha);
            r.head = Head::Branch(name.to_string());
            Ok(())
        })
    }

    fn pull_fast_forward(&self, repo: &Path, remote_ref: &str) -> Result<PullOutcome> {
        self.log(format!("pull {}", remote_ref));
        let diverged = self.diverged.borrow();
        self.with_repo(repo, |r| {
            let Head::Branch(branch) = r.head.clone() else {
                return Err(Error::git("merge", "not on a branch"));
            };
            if diverged.contains(&branch) {
                return Ok(PullOutcome::Diverged);
            }
            let remote_sha = r
                .remote
                .iter()
                .find(|(name, _)| *name == branch)
                .map(|(_, sha)| sha.clone())
                .ok_or_else(|| Error::git("merge", format!("unknown ref {}", remote_ref)))?;
            let local_sha = r.local.get(&branch).cloned().unwrap_or_default();
            if local_sha == remote_sha {
                return Ok(PullOutcome::UpToDate);
            }
            r.local.insert(branch, remote_sha);
            Ok(PullOutcome::FastForwarded)
        })
    }

    fn push(&self, _repo: &Path, target: &str, branch: &str, force: bool) -> Result<()> {
        let force = if force { " --force" } else { "" };
        self.log(format!("push {} {}{}", target, branch, force));
        if self.failing_pushes.borrow().contains(branch) {
            return Err(Error::git("push", "rejected"));
        }
        Ok(())
    }

    fn stage_all(&self, _repo: &Path) -> Result<()> {
        self.log("stage".to_string());
        Ok(())
    }

    fn commit(&self, _repo: &Path, message: &str) -> Result<bool> {
        self.log(format!("commit {}", message));
        Ok(true)
    }

    fn untrack(&self, _repo: &Path, paths: &[PathBuf]) -> Result<()> {
        self.log(format!("untrack {}", paths.len()));
        Ok(())
    }

    fn changed_blobs(&self, repo: &Path, branch: &str) -> Result<Vec<ChangedBlob>> {
        self.with_repo(repo, |r| Ok(r.blobs.get(branch).cloned().unwrap_or_default()))
    }

    fn rewrite_history(&self, repo: &Path, patterns: &[String]) -> Result<()> {
        self.log(format!("rewrite {}", patterns.join(",")));
        if let Some(message) = self.rewrite_error.borrow().clone() {
            return Err(Error::HistoryRewrite(message));
        }
        // filter-repo removes the origin remote.
        self.with_repo(repo, |r| {
            r.origin = None;
            Ok(())
        })
    }
}

pub const FAKE_HOST: &str = "gitlab.example.com";

/// An in-memory GitLab.
#[derive(Default)]
pub struct FakeApi {
    groups: RefCell<Vec<Group>>,
    projects: RefCell<Vec<(u64, Project)>>,
    failing: RefCell<HashSet<u64>>,
    rejected_token: Cell<bool>,
    next_id: Cell<u64>,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.next_id.set(100);
        api
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn insert_group(&self, parent_id: Option<u64>, name: &str, path: &str) -> Group {
        let full_path = match parent_id.and_then(|id| self.group(id)) {
            Some(parent) => format!("{}/{}", parent.full_path, path),
            None => path.to_string(),
        };
        let group = Group {
            id: self.allocate_id(),
            name: name.to_string(),
            path: path.to_string(),
            full_path,
            parent_id,
        };
        self.groups.borrow_mut().push(group.clone());
        group
    }

    fn insert_project(&self, group_id: u64, name: &str, path: &str) -> Project {
        let namespace = self.group(group_id).map(|g| g.full_path).unwrap_or_default();
        let full = format!("{}/{}", namespace, path);
        let project = Project {
            id: self.allocate_id(),
            name: name.to_string(),
            path: path.to_string(),
            path_with_namespace: full.clone(),
            http_url_to_repo: Some(format!("https://{}/{}.git", FAKE_HOST, full)),
            ssh_url_to_repo: Some(format!("git@{}:{}.git", FAKE_HOST, full)),
            default_branch: Some("main".to_string()),
        };
        self.projects.borrow_mut().push((group_id, project.clone()));
        project
    }

    pub fn add_group(&self, parent_id: Option<u64>, name: &str) -> u64 {
        self.insert_group(parent_id, name, &remote_slug(name)).id
    }

    pub fn add_project(&self, group_id: u64, name: &str) -> Project {
        self.insert_project(group_id, name, &remote_slug(name))
    }

    /// Every call touching this group fails with a server error.
    pub fn fail_group(&self, group_id: u64) {
        self.failing.borrow_mut().insert(group_id);
    }

    pub fn reject_token(&self) {
        self.rejected_token.set(true);
    }

    pub fn group(&self, id: u64) -> Option<Group> {
        self.groups.borrow().iter().find(|g| g.id == id).cloned()
    }

    pub fn group_by_path(&self, full_path: &str) -> Option<Group> {
        self.groups
            .borrow()
            .iter()
            .find(|g| g.full_path == full_path)
            .cloned()
    }

    pub fn project_by_path(&self, path_with_namespace: &str) -> Option<Project> {
        self.projects
            .borrow()
            .iter()
            .map(|(_, p)| p)
            .find(|p| p.path_with_namespace == path_with_namespace)
            .cloned()
    }

    pub fn group_count(&self) -> usize {
        self.groups.borrow().len()
    }

    pub fn project_count(&self) -> usize {
        self.projects.borrow().len()
    }

    fn check(&self, group_id: u64) -> Result<()> {
        if self.failing.borrow().contains(&group_id) {
            return Err(Error::api(500, "server error"));
        }
        Ok(())
    }
}

impl HostingApi for FakeApi {
    fn current_user(&self) -> Result<User> {
        if self.rejected_token.get() {
            return Err(Error::Authentication("GitLab token is invalid".to_string()));
        }
        Ok(User {
            id: 1,
            username: "tester".to_string(),
        })
    }

    fn get_group(&self, id_or_path: &str) -> Result<Group> {
        let found = match id_or_path.parse::<u64>() {
            Ok(id) => self.group(id),
            Err(_) => self.group_by_path(id_or_path.trim_matches('/')),
        };
        found.ok_or_else(|| Error::api(404, "not found"))
    }

    fn list_subgroups(&self, group_id: u64) -> Result<Vec<Group>> {
        self.check(group_id)?;
        Ok(self
            .groups
            .borrow()
            .iter()
            .filter(|g| g.parent_id == Some(group_id))
            .cloned()
            .collect())
    }

    fn list_projects(&self, group_id: u64) -> Result<Vec<Project>> {
        self.check(group_id)?;
        Ok(self
            .projects
            .borrow()
            .iter()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn post_group(&self, parent_id: u64, name: &str, path: &str) -> Result<Group> {
        self.check(parent_id)?;
        Ok(self.insert_group(Some(parent_id), name, path))
    }

    fn post_project(&self, group_id: u64, name: &str, path: &str) -> Result<Project> {
        self.check(group_id)?;
        Ok(self.insert_project(group_id, name, path))
    }
}
