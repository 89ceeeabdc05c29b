pub mod graph;
pub mod merge;
pub mod resource;
pub mod split;
pub mod structured;

use crate::actions::{Assignment, Condition, Expression};
use crate::resources::work_group::WorkGroup;

pub use graph::FlowGraph;
pub use merge::{MergeKind, MergeSpec};
pub use resource::{ActivitySpec, Cancellations, ReleaseSpec, RequestSpec, SiteId};
pub use split::{Branch, SplitKind, SplitSpec};
pub use structured::{LoopControl, StructuredSpec};

/// Position of a flow in the graph arena.
pub type NodeIndex = usize;

#[derive(Debug, Clone)]
pub enum NodeKind {
    Pass,
    Delay(Expression),
    Assign(Assignment),
    Split(SplitSpec),
    Merge(MergeSpec),
    Structured(StructuredSpec),
    RequestResources(RequestSpec),
    ReleaseResources(ReleaseSpec),
    Activity(ActivitySpec),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Pass => "pass",
            NodeKind::Delay(_) => "delay",
            NodeKind::Assign(_) => "assign",
            NodeKind::Split(_) => "split",
            NodeKind::Merge(_) => "merge",
            NodeKind::Structured(_) => "structured",
            NodeKind::RequestResources(_) => "request_resources",
            NodeKind::ReleaseResources(_) => "release_resources",
            NodeKind::Activity(_) => "activity",
        }
    }

    /// Work groups for nodes that acquire resources; `None` for every other kind.
    pub fn work_groups(&self) -> Option<&[WorkGroup]> {
        match self {
            NodeKind::RequestResources(spec) => Some(&spec.work_groups),
            NodeKind::Activity(spec) => Some(&spec.work_groups),
            _ => None,
        }
    }

    pub fn work_groups_mut(&mut self) -> Option<&mut Vec<WorkGroup>> {
        match self {
            NodeKind::RequestResources(spec) => Some(&mut spec.work_groups),
            NodeKind::Activity(spec) => Some(&mut spec.work_groups),
            _ => None,
        }
    }

    pub fn cancellations_mut(&mut self) -> Option<&mut Cancellations> {
        match self {
            NodeKind::ReleaseResources(spec) => Some(&mut spec.cancellations),
            NodeKind::Activity(spec) => Some(&mut spec.cancellations),
            _ => None,
        }
    }

    pub fn acquires_resources(&self) -> bool {
        self.work_groups().is_some()
    }
}

/// A node in the flow graph.
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: String,
    pub kind: NodeKind,
    /// Single successor; splits keep theirs in `SplitSpec::branches`.
    pub next: Option<NodeIndex>,
    /// The structured node or activity whose inner graph this node belongs to.
    pub owner: Option<NodeIndex>,
    /// Queue priority when waiting for resources; lower is served first.
    pub priority: i32,
    pub guard: Option<Condition>,
}

impl Flow {
    pub fn new(id: &str, kind: NodeKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            next: None,
            owner: None,
            priority: 0,
            guard: None,
        }
    }

    pub fn successors(&self) -> Vec<NodeIndex> {
        match &self.kind {
            NodeKind::Split(spec) => spec.branches.iter().map(|b| b.target).collect(),
            _ => self.next.into_iter().collect(),
        }
    }

    /// Entry points of inner graphs this node drives.
    pub fn inner_entries(&self) -> Vec<NodeIndex> {
        match &self.kind {
            NodeKind::Structured(spec) => vec![spec.entry],
            kind => kind
                .work_groups()
                .unwrap_or(&[])
                .iter()
                .filter_map(|g| g.flow_entry())
                .collect(),
        }
    }
}
