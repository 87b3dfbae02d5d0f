//! Mirror a remote group tree into a local directory tree.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    cleanup::CleanupEngine,
    config::CloneConfig,
    error::{Error, Result},
    git2_ops::DEFAULT_REMOTE,
    gitlab::{HostingApi, Project, authenticated_url},
    history::{self, RewriteConfirmation},
    namespace::{check_path_length, resolve_local_path},
    progress::ProgressSink,
    reconcile::{BranchHook, NoHook, Reconciler},
    report::{RepoOutcome, RepoRecord, Report},
    vcs::Vcs,
    walker::{HierarchyNode, NodeKind, TreeVisitor, walk},
};

/// Projects carry their API record; groups carry nothing.
pub type ClonePayload = Option<Project>;

pub struct CloneVisitor<'a, A: HostingApi + ?Sized, V: Vcs + ?Sized> {
    config: &'a CloneConfig,
    api: &'a A,
    vcs: &'a V,
    cleanup: Option<CleanupEngine<'a, V>>,
}

impl<'a, A: HostingApi + ?Sized, V: Vcs + ?Sized> CloneVisitor<'a, A, V> {
    pub fn new(config: &'a CloneConfig, api: &'a A, vcs: &'a V) -> Result<Self> {
        let cleanup = if config.cleanup.enabled {
            Some(CleanupEngine::new(vcs, &config.cleanup)?)
        } else {
            None
        };
        Ok(Self {
            config,
            api,
            vcs,
            cleanup,
        })
    }

    fn clone_url(&self, project: &Project) -> Result<String> {
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
                format!("project {} has no clone URL", project.path_with_namespace),
            )
        })
    }

    /// Clone when the directory is new, otherwise reuse the existing working copy.
    fn materialize(&self, path: &Path, project: &Project) -> Result<RepoOutcome> {
        if path.join(".git").exists() {
            tracing::info!("[EXISTS] {} - updating", path.display());
            return Ok(RepoOutcome::Updated);
        }
        let occupied = fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if occupied {
            return Err(Error::git(
                "clone",
                format!("{} exists and is not a git repository", path.display()),
            ));
        }
        let url = self.clone_url(project)?;
        tracing::info!("[CLONE] {} -> {}", project.path_with_namespace, path.display());
        self.vcs.clone_repo(&url, path)?;
        Ok(RepoOutcome::Created)
    }

    fn run_history(&self, path: &Path, record: &mut RepoRecord) {
        let Some(engine) = &self.cleanup else {
            return;
        };
        let settings = &self.config.cleanup;
        if !settings.history {
            return;
        }
        let plans = match history::analyze(self.vcs, path, engine.patterns()) {
            Ok(plans) => plans,
            Err(error) => {
                record.error(format!("history analysis: {}", error));
                return;
            }
        };
        history::print_analysis(path, &plans);

        let Some(confirmed) = RewriteConfirmation::from_flags(settings.history, settings.dry_run)
        else {
            return;
        };
        match history::rewrite(self.vcs, path, &plans, confirmed) {
            Ok(outcome) => {
                for (branch, reason) in outcome.push_failures {
                    record.error(format!("force-push of '{}' after rewrite: {}", branch, reason));
                }
            }
            Err(error) => record.error(error),
        }
    }
}

impl<A: HostingApi + ?Sized, V: Vcs + ?Sized> TreeVisitor for CloneVisitor<'_, A, V> {
    type Payload = ClonePayload;

    fn expand(
        &mut self,
        group: &HierarchyNode<ClonePayload>,
        report: &mut Report,
    ) -> Result<Vec<HierarchyNode<ClonePayload>>> {
        let group_id = group
            .remote_id
            .ok_or_else(|| Error::api(0, format!("group {} has no id", group.name)))?;
        let mut children = Vec::new();
        // Sanitized names can collide; the first claimant keeps the directory.
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();

        for project in self.api.list_projects(group_id)? {
            let local_name = self.config.names.local_name(&project.name);
            let path = resolve_local_path(&group.local_path, &local_name);
            if let Some(owner) = claim(&mut claimed, &path, &project.path_with_namespace) {
                report.node_error(
                    project.path_with_namespace.clone(),
                    collision(&path, &owner),
                );
                continue;
            }
            children.push(group.child(
                NodeKind::Project,
                project.name.clone(),
                path,
                None,
                project.path_with_namespace.clone(),
                Some(project),
            ));
        }

        for subgroup in self.api.list_subgroups(group_id)? {
            let local_name = self.config.names.local_name(&subgroup.name);
            let path = resolve_local_path(&group.local_path, &local_name);
            if let Some(owner) = claim(&mut claimed, &path, &subgroup.full_path) {
                report.node_error(subgroup.full_path.clone(), collision(&path, &owner));
                continue;
            }
            if path.is_dir() {
                tracing::debug!("[EXISTS] {}", path.display());
            } else if let Err(error) = fs::create_dir_all(&path) {
                report.node_error(subgroup.full_path.clone(), Error::fs(&path, error));
                continue;
            } else {
                tracing::info!("[MKDIR] {}", path.display());
            }
            children.push(group.child(
                NodeKind::Group,
                subgroup.name,
                path,
                Some(subgroup.id),
                subgroup.full_path,
                None,
            ));
        }
        Ok(children)
    }

    fn visit_project(&mut self, node: &HierarchyNode<ClonePayload>) -> RepoRecord {
        let path = &node.local_path;
        let Some(project) = &node.payload else {
            return RepoRecord::failed(path, &node.name, "project node without project data");
        };
        check_path_length(path, self.config.max_path_length);

        let outcome = match self.materialize(path, project) {
            Ok(outcome) => outcome,
            Err(error) => return RepoRecord::failed(path, &node.name, error),
        };
        let mut record = RepoRecord::new(path, &node.name, outcome);

        let reconciler = Reconciler::new(self.vcs, DEFAULT_REMOTE);
        let mut no_hook = NoHook;
        let hook: &mut dyn BranchHook = match &mut self.cleanup {
            Some(engine) => engine,
            None => &mut no_hook,
        };
        let state = reconciler.reconcile(path, hook);
        state.apply_to(&mut record);

        if state.fatal.is_none() {
            self.run_history(path, &mut record);
        }
        record
    }
}

/// Returns the previous owner when `path` is already taken.
fn claim(claimed: &mut HashMap<PathBuf, String>, path: &Path, owner: &str) -> Option<String> {
    match claimed.get(path) {
        Some(previous) => Some(previous.clone()),
        None => {
            claimed.insert(path.to_path_buf(), owner.to_string());
            None
        }
    }
}

fn collision(path: &Path, owner: &str) -> Error {
    Error::fs(
        path,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("local directory is already used by {}", owner),
        ),
    )
}

/// Authenticate, resolve the root group, and mirror it into the destination.
pub fn run<A: HostingApi + ?Sized, V: Vcs + ?Sized>(
    config: &CloneConfig,
    api: &A,
    vcs: &V,
    progress: &dyn ProgressSink,
) -> Result<Report> {
    let user = api.current_user()?;
    tracing::info!("Authenticated as {}", user.username);

    let mut visitor = CloneVisitor::new(config, api, vcs)?;
    let root = api.get_group(&config.group)?;
    fs::create_dir_all(&config.destination)
        .map_err(|e| Error::fs(&config.destination, e))?;
    tracing::info!(
        "Cloning group {} into {}",
        root.full_path,
        config.destination.display()
    );

    let root = HierarchyNode::root(
        NodeKind::Group,
        root.name,
        config.destination.clone(),
        Some(root.id),
        root.full_path,
        None,
    );
    Ok(walk(&mut visitor, root, progress))
}
