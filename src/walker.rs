//! Breadth-first traversal shared by the cloner and the publisher.
//!
//! The walker owns the FIFO queue and the report; a [`TreeVisitor`] decides
//! what the children of a group are (API listing or directory scan) and what
//! happens to each project.

use std::{collections::VecDeque, path::PathBuf};

use crate::{
    error::Result,
    progress::ProgressSink,
    report::{RepoRecord, Report},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Project,
}

/// One level of the hierarchy, built when its parent is expanded and dropped
/// once its own children are queued.
#[derive(Debug, Clone)]
pub struct HierarchyNode<P> {
    pub kind: NodeKind,
    pub name: String,
    pub local_path: PathBuf,
    /// Group id for groups; `None` for projects and for groups not created yet.
    pub remote_id: Option<u64>,
    pub remote_path: String,
    pub parent_id: Option<u64>,
    pub depth: usize,
    pub payload: P,
}

impl<P> HierarchyNode<P> {
    pub fn root(
        kind: NodeKind,
        name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        remote_id: Option<u64>,
        remote_path: impl Into<String>,
        payload: P,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            local_path: local_path.into(),
            remote_id,
            remote_path: remote_path.into(),
            parent_id: None,
            depth: 0,
            payload,
        }
    }

    /// A child one level down. `parent_id` is this node's remote id.
    pub fn child<C>(
        &self,
        kind: NodeKind,
        name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        remote_id: Option<u64>,
        remote_path: impl Into<String>,
        payload: C,
    ) -> HierarchyNode<C> {
        HierarchyNode {
            kind,
            name: name.into(),
            local_path: local_path.into(),
            remote_id,
            remote_path: remote_path.into(),
            parent_id: self.remote_id,
            depth: self.depth + 1,
            payload,
        }
    }

    pub fn label(&self) -> String {
        if self.remote_path.is_empty() {
            self.local_path.display().to_string()
        } else {
            self.remote_path.clone()
        }
    }
}

pub trait TreeVisitor {
    type Payload;

    /// Children of a group, in listing order. An error here is recorded
    /// against the group and its subtree is skipped.
    fn expand(
        &mut self,
        group: &HierarchyNode<Self::Payload>,
        report: &mut Report,
    ) -> Result<Vec<HierarchyNode<Self::Payload>>>;

    fn visit_project(&mut self, project: &HierarchyNode<Self::Payload>) -> RepoRecord;
}

/// Visit every node reachable from `root`, level by level.
pub fn walk<V: TreeVisitor>(
    visitor: &mut V,
    root: HierarchyNode<V::Payload>,
    progress: &dyn ProgressSink,
) -> Report {
    let mut report = Report::new();
    let mut queue = VecDeque::from([root]);

    while let Some(node) = queue.pop_front() {
        match node.kind {
            NodeKind::Group => {
                progress.group_started(&node.name, node.depth);
                report.groups_processed += 1;
                match visitor.expand(&node, &mut report) {
                    Ok(children) => queue.extend(children),
                    Err(error) => report.node_error(node.label(), error),
                }
            }
            NodeKind::Project => {
                progress.repository_started(&node.name);
                let record = visitor.visit_project(&node);
                progress.repository_finished(&record);
                let path = record.path.clone();
                if !report.record(record) {
                    report.node_error(
                        node.label(),
                        format!("{} was already recorded by another project", path.display()),
                    );
                }
            }
        }
    }

    progress.finish();
    report
}
