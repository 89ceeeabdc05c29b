use crate::actions::Condition;
use crate::error::{FlowError, FlowResult};
use crate::nodes::{Flow, FlowGraph, MergeKind, NodeIndex, NodeKind};
use crate::resources::work_group::{Behavior, WorkGroup};
use crate::resources::{ResourceCatalog, ResourceId, ResourceTypeId, TimetableEntry};
use crate::runtime::Timestamp;

/// A flow graph together with the resources it competes for.
///
/// Built either by hand through the methods below or by the compiler from
/// a `ModelDef`.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub(crate) graph: FlowGraph,
    pub(crate) catalog: ResourceCatalog,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn add_resource_type(&mut self, name: &str) -> ResourceTypeId {
        self.catalog.add_type(name)
    }

    pub fn add_resource(&mut self, name: &str, roles: &[ResourceTypeId]) -> FlowResult<ResourceId> {
        self.catalog.add_resource(name, roles)
    }

    pub fn add_timetable_entry(
        &mut self,
        resource: ResourceId,
        resource_type: ResourceTypeId,
        start: Timestamp,
        duration: u64,
        period: Option<u64>,
    ) -> FlowResult<()> {
        self.catalog.add_timetable_entry(
            resource,
            TimetableEntry {
                resource_type,
                start,
                duration,
                period,
            },
        )
    }

    pub fn add_node(&mut self, id: &str, kind: NodeKind) -> NodeIndex {
        self.graph.push(Flow::new(id, kind))
    }

    pub fn link(&mut self, from: NodeIndex, to: NodeIndex) -> FlowResult<()> {
        self.graph.link(from, to)
    }

    pub fn link_guarded(&mut self, from: NodeIndex, to: NodeIndex, guard: Condition) -> FlowResult<()> {
        self.graph.link_guarded(from, to, guard)
    }

    pub fn link_weighted(&mut self, from: NodeIndex, to: NodeIndex, weight: f64) -> FlowResult<()> {
        self.graph.link_weighted(from, to, weight)
    }

    pub fn set_priority(&mut self, node: NodeIndex, priority: i32) -> FlowResult<()> {
        self.graph.node_mut(node)?.priority = priority;
        Ok(())
    }

    /// Admission guard checked by executable tokens before the node starts.
    pub fn set_guard(&mut self, node: NodeIndex, guard: Condition) -> FlowResult<()> {
        self.graph.node_mut(node)?.guard = Some(guard);
        Ok(())
    }

    /// Returns the group's position among the node's work groups.
    pub fn add_work_group(&mut self, node: NodeIndex, group: WorkGroup) -> FlowResult<usize> {
        let type_count = self.catalog.type_count();
        if let Some((t, _)) = group.requirements.iter().find(|(t, _)| t.0 >= type_count) {
            return Err(FlowError::UnknownResourceType(t.0.to_string()));
        }
        let groups = self
            .graph
            .node_mut(node)?
            .kind
            .work_groups_mut()
            .ok_or_else(|| FlowError::WrongKind {
                node,
                expected: "resource-consuming".to_string(),
            })?;
        groups.push(group);
        Ok(groups.len() - 1)
    }

    /// Makes resources of `resource_type` released by `node` unavailable for
    /// `duration` afterwards.
    pub fn add_resource_cancellation(
        &mut self,
        node: NodeIndex,
        resource_type: ResourceTypeId,
        duration: u64,
    ) -> FlowResult<()> {
        if resource_type.0 >= self.catalog.type_count() {
            return Err(FlowError::UnknownResourceType(resource_type.0.to_string()));
        }
        let cancellations = self
            .graph
            .node_mut(node)?
            .kind
            .cancellations_mut()
            .ok_or_else(|| FlowError::WrongKind {
                node,
                expected: "resource-releasing".to_string(),
            })?;
        cancellations.insert(resource_type, duration);
        Ok(())
    }

    /// Resolves inner-graph ownership and reports configuration problems.
    /// Problems are not fatal: the engine reports them as errors and the
    /// affected tokens degrade to false tokens.
    pub fn validate(&mut self) -> Vec<FlowError> {
        let mut errors = self.graph.assign_owners();
        self.graph.mark_back_edges();
        let mut normalized = Vec::new();
        for (index, flow) in self.graph.iter() {
            if let Some(groups) = flow.kind.work_groups() {
                if groups.is_empty() {
                    errors.push(FlowError::configuration(index, "no work groups defined"));
                }
                for group in groups {
                    if let Some(entry) = group.flow_entry() {
                        if self.graph.get(entry).is_none() {
                            errors.push(FlowError::UnknownNode(entry));
                        }
                    }
                }
            }
            match &flow.kind {
                NodeKind::Activity(spec)
                    if spec.interruptible
                        && spec.work_groups.iter().any(|g| matches!(g.behavior, Behavior::Flow { .. })) =>
                {
                    errors.push(FlowError::configuration(
                        index,
                        "flow-driven activities cannot be interruptible",
                    ));
                    normalized.push(index);
                }
                NodeKind::Merge(spec)
                    if spec.incoming == 0 && !matches!(spec.kind, MergeKind::Thread { .. }) =>
                {
                    errors.push(FlowError::configuration(index, "merge has no incoming links"));
                }
                _ => {}
            }
        }
        for index in normalized {
            if let Ok(flow) = self.graph.node_mut(index) {
                if let NodeKind::Activity(spec) = &mut flow.kind {
                    spec.interruptible = false;
                }
            }
        }
        errors
    }
}
