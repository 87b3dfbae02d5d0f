//! Publish a local directory tree of repositories into a remote group tree.
//!
//! Directories holding a repository become projects; directories with
//! repositories somewhere beneath them become groups. Everything else,
//! including hidden directories, is ignored.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{
    config::PublishConfig,
    error::{Error, Result},
    git::redact_credentials,
    gitlab::{Creation, Group, HostingApi, Project, authenticated_url},
    namespace::{remote_slug, resolve_remote_path},
    progress::ProgressSink,
    report::{RepoOutcome, RepoRecord, Report},
    vcs::Vcs,
    walker::{HierarchyNode, NodeKind, TreeVisitor, walk},
};

pub struct PublishVisitor<'a, A: HostingApi + ?Sized, V: Vcs + ?Sized> {
    config: &'a PublishConfig,
    api: &'a A,
    vcs: &'a V,
    /// `(parent id, path)` to group, filled as groups are resolved.
    groups: HashMap<(u64, String), Group>,
}

impl<'a, A: HostingApi + ?Sized, V: Vcs + ?Sized> PublishVisitor<'a, A, V> {
    pub fn new(config: &'a PublishConfig, api: &'a A, vcs: &'a V) -> Self {
        Self {
            config,
            api,
            vcs,
            groups: HashMap::new(),
        }
    }

    fn ensure_group(&mut self, parent_id: u64, name: &str, report: &mut Report) -> Result<Group> {
        let path = remote_slug(name);
        let key = (parent_id, path.clone());
        if let Some(group) = self.groups.get(&key) {
            return Ok(group.clone());
        }
        let group = match self.api.create_group(parent_id, name, &path) {
            Creation::Created(group) => {
                tracing::info!("[GROUP] Created {}", group.full_path);
                report.groups_created += 1;
                group
            }
            Creation::AlreadyExists(group) => {
                tracing::info!("[GROUP] {} already exists", group.full_path);
                group
            }
            Creation::Failed(error) => return Err(error),
        };
        self.groups.insert(key, group.clone());
        Ok(group)
    }

    fn push_url(&self, project: &Project) -> Result<String> {
        let url = if self.config.use_ssh {
            project.ssh_url_to_repo.clone()
        } else {
            project
                .http_url_to_repo
                .as_deref()
                .map(|url| authenticated_url(url, &self.config.gitlab.token))
        };
        url.ok_or_else(|| {
            Error::api(
                0,
                format!("project {} has no push URL", project.path_with_namespace),
            )
        })
    }

    fn publish(&self, node: &HierarchyNode<()>) -> Result<RepoRecord> {
        let path = &node.local_path;
        if self.vcs.is_bare(path)? {
            return Err(Error::git(
                "push",
                "bare repository skipped; publish from a working copy",
            ));
        }
        let branches = self.vcs.local_branches(path)?;
        if branches.is_empty() {
            return Err(Error::git("push", "repository has no branches to push"));
        }
        let group_id = node
            .parent_id
            .ok_or_else(|| Error::api(0, format!("no target group for {}", node.name)))?;

        let (project, outcome) =
            match self
                .api
                .create_project(group_id, &node.name, &remote_slug(&node.name))
            {
                Creation::Created(project) => {
                    tracing::info!("[PROJECT] Created {}", project.path_with_namespace);
                    (project, RepoOutcome::Created)
                }
                Creation::AlreadyExists(project) => {
                    tracing::info!("[PROJECT] {} already exists", project.path_with_namespace);
                    (project, RepoOutcome::Updated)
                }
                Creation::Failed(error) => return Err(error),
            };

        let url = self.push_url(&project)?;
        let mut record = RepoRecord::new(path, &node.name, outcome);
        tracing::info!(
            "[PUSH] {} branch(es) to {}",
            branches.len(),
            redact_credentials(&url)
        );
        for branch in &branches {
            match self.vcs.push(path, &url, branch, false) {
                Ok(()) => record.branches.pushed += 1,
                Err(error) => {
                    record.branches.failed += 1;
                    record.error(format!("branch '{}': {}", branch, error));
                }
            }
        }
        Ok(record)
    }
}

impl<A: HostingApi + ?Sized, V: Vcs + ?Sized> TreeVisitor for PublishVisitor<'_, A, V> {
    type Payload = ();

    fn expand(
        &mut self,
        group: &HierarchyNode<()>,
        report: &mut Report,
    ) -> Result<Vec<HierarchyNode<()>>> {
        let group_id = group
            .remote_id
            .ok_or_else(|| Error::api(0, format!("group {} was not created", group.name)))?;
        let mut children = Vec::new();

        for dir in child_directories(&group.local_path)? {
            let name = file_name(&dir);
            let remote_path = resolve_remote_path(&group.remote_path, &name);
            if looks_like_repository(&dir) {
                children.push(group.child(NodeKind::Project, name, dir, None, remote_path, ()));
            } else if contains_repository(&dir) {
                match self.ensure_group(group_id, &name, report) {
                    Ok(created) => children.push(group.child(
                        NodeKind::Group,
                        name,
                        dir,
                        Some(created.id),
                        created.full_path,
                        (),
                    )),
                    Err(error) => report.node_error(remote_path, error),
                }
            } else {
                tracing::debug!("Skipping {}: no repositories beneath it", dir.display());
            }
        }
        Ok(children)
    }

    fn visit_project(&mut self, node: &HierarchyNode<()>) -> RepoRecord {
        self.publish(node)
            .unwrap_or_else(|error| RepoRecord::failed(&node.local_path, &node.name, error))
    }
}

/// Non-hidden subdirectories, sorted by name.
fn child_directories(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::fs(dir, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::fs(dir, e))?;
        let path = entry.path();
        if path.is_dir() && !is_hidden(&path) {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

/// A working copy (`.git` inside) or a bare repository.
fn looks_like_repository(dir: &Path) -> bool {
    dir.join(".git").exists()
        || (dir.join("HEAD").is_file() && dir.join("objects").is_dir() && dir.join("refs").is_dir())
}

fn contains_repository(dir: &Path) -> bool {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_type().is_dir() && !is_hidden(e.path()))
        .filter_map(|e| e.ok())
        .any(|e| looks_like_repository(e.path()))
}

/// Authenticate, resolve the target group, and publish the source tree into it.
pub fn run<A: HostingApi + ?Sized, V: Vcs + ?Sized>(
    config: &PublishConfig,
    api: &A,
    vcs: &V,
    progress: &dyn ProgressSink,
) -> Result<Report> {
    let user = api.current_user()?;
    tracing::info!("Authenticated as {}", user.username);

    if !config.source.is_dir() {
        return Err(Error::Config(format!(
            "source {} is not a directory",
            config.source.display()
        )));
    }
    let target = api.get_group(&config.parent_group)?;
    tracing::info!(
        "Publishing {} into group {}",
        config.source.display(),
        target.full_path
    );

    let mut visitor = PublishVisitor::new(config, api, vcs);
    let root = if looks_like_repository(&config.source) {
        // The source itself is one repository: publish it as a single project.
        let name = file_name(&config.source);
        let mut node = HierarchyNode::root(
            NodeKind::Project,
            name.clone(),
            config.source.clone(),
            None,
            resolve_remote_path(&target.full_path, &name),
            (),
        );
        node.parent_id = Some(target.id);
        node
    } else {
        HierarchyNode::root(
            NodeKind::Group,
            target.name,
            config.source.clone(),
            Some(target.id),
            target.full_path,
            (),
        )
    };
    Ok(walk(&mut visitor, root, progress))
}
