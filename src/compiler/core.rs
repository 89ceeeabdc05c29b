use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result, anyhow};

use crate::actions::{Assignment, Condition, Expression};
use crate::dsl::{ModelDef, NodeDef, NodeType, WorkGroupDef};
use crate::model::Model;
use crate::nodes::{
    ActivitySpec, Cancellations, LoopControl, MergeKind, MergeSpec, NodeIndex, NodeKind,
    ReleaseSpec, RequestSpec, SplitKind, SplitSpec, StructuredSpec,
};
use crate::resources::ResourceTypeId;
use crate::resources::work_group::WorkGroup;
use crate::runtime::blueprint::{ArrivalPlan, Blueprint};

/// Turns a `ModelDef` into a runnable `Blueprint`, resolving string ids to
/// arena indices.
pub struct Compiler {
    id_map: HashMap<String, NodeIndex>,
    type_map: HashMap<String, ResourceTypeId>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            id_map: HashMap::new(),
            type_map: HashMap::new(),
        }
    }

    pub fn compile(&mut self, def: ModelDef) -> Result<Blueprint> {
        self.id_map.clear();
        self.type_map.clear();
        let mut model = Model::new();

        // 0. Resources
        for name in &def.resource_types {
            let id = model.add_resource_type(name);
            self.type_map.insert(name.clone(), id);
        }
        for resource in &def.resources {
            let roles = resource
                .types
                .iter()
                .map(|t| self.resolve_type(t))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Resource '{}'", resource.id))?;
            let rid = model.add_resource(&resource.id, &roles)?;
            for window in &resource.timetable {
                let rtype = self.resolve_type(&window.resource_type)?;
                model
                    .add_timetable_entry(rid, rtype, window.start, window.duration, window.period)
                    .with_context(|| format!("Timetable of resource '{}'", resource.id))?;
            }
        }

        // 1. Indexing
        for (idx, node) in def.nodes.iter().enumerate() {
            if self.id_map.insert(node.id.clone(), idx).is_some() {
                return Err(anyhow!("Duplicate node ID: {}", node.id));
            }
        }

        // 2. Transform
        for node in &def.nodes {
            let kind = self
                .transform_node(node)
                .with_context(|| format!("Failed to compile node '{}'", node.id))?;
            let index = model.add_node(&node.id, kind);
            if let Some(guard) = &node.guard {
                model.set_guard(index, Condition::parse(guard)?)?;
            }
            if let NodeType::RequestResources { priority, .. } | NodeType::Activity { priority, .. } = &node.kind {
                model.set_priority(index, *priority)?;
            }
        }

        // 3. Edges, in declaration order (branch order of splits)
        for edge in &def.edges {
            let from = self.resolve_target(&edge.source)?;
            let to = self.resolve_target(&edge.target)?;
            let linked = match (&edge.condition, edge.weight) {
                (Some(condition), _) => model.link_guarded(from, to, Condition::parse(condition)?),
                (None, Some(weight)) => model.link_weighted(from, to, weight),
                (None, None) => model.link(from, to),
            };
            linked.with_context(|| format!("Invalid edge {} -> {}", edge.source, edge.target))?;
        }

        // 4. Generators
        let mut arrivals = Vec::with_capacity(def.generators.len());
        for generator in &def.generators {
            arrivals.push(ArrivalPlan {
                root: self.resolve_target(&generator.flow)?,
                at: generator.at,
                count: generator.count,
                every: generator.every,
                repeat: generator.repeat,
                vars: generator.vars.clone(),
            });
        }

        Ok(Blueprint {
            id: def.id,
            name: def.name,
            model,
            arrivals,
            config: def.simulation,
        })
    }

    fn transform_node(&self, node: &NodeDef) -> Result<NodeKind> {
        let merge = |kind: MergeKind, accept: &Option<usize>| {
            let spec = MergeSpec::new(kind);
            NodeKind::Merge(match accept {
                Some(n) => spec.with_accept(*n),
                None => spec,
            })
        };
        let kind = match &node.kind {
            NodeType::Pass => NodeKind::Pass,
            NodeType::Delay { duration } => NodeKind::Delay(Expression::parse(duration)?),
            NodeType::Assign { expression } => NodeKind::Assign(Assignment::parse(expression)?),

            NodeType::Parallel => NodeKind::Split(SplitSpec::new(SplitKind::Parallel)),
            NodeType::ExclusiveChoice => NodeKind::Split(SplitSpec::new(SplitKind::ExclusiveChoice)),
            NodeType::MultiChoice => NodeKind::Split(SplitSpec::new(SplitKind::MultiChoice)),
            NodeType::ProbabilitySelection => {
                NodeKind::Split(SplitSpec::new(SplitKind::ProbabilitySelection))
            }
            NodeType::ThreadSplit { copies } => {
                NodeKind::Split(SplitSpec::new(SplitKind::Thread { copies: *copies }))
            }

            NodeType::SimpleMerge => merge(MergeKind::Simple, &None),
            NodeType::Synchronization { accept } => merge(MergeKind::Synchronization, accept),
            NodeType::MultiMerge => merge(MergeKind::Multi, &None),
            NodeType::GeneralizedAndJoin { accept } => merge(MergeKind::GeneralizedAnd, accept),
            NodeType::GeneralizedOrJoin => merge(MergeKind::GeneralizedOr, &None),
            NodeType::ThreadMerge { threads, accept } => {
                merge(MergeKind::Thread { threads: *threads }, accept)
            }

            NodeType::Structured { entry } => self.structured(entry, LoopControl::Once)?,
            NodeType::ForLoop { entry, iterations } => {
                self.structured(entry, LoopControl::For(Expression::parse(iterations)?))?
            }
            NodeType::WhileDo { entry, condition } => {
                self.structured(entry, LoopControl::WhileDo(Condition::parse(condition)?))?
            }
            NodeType::DoWhile { entry, condition } => {
                self.structured(entry, LoopControl::DoWhile(Condition::parse(condition)?))?
            }

            NodeType::RequestResources { site, work_groups, .. } => NodeKind::RequestResources(RequestSpec {
                site: *site,
                work_groups: self.work_groups(work_groups)?,
            }),
            NodeType::ReleaseResources { site, cancellations } => NodeKind::ReleaseResources(ReleaseSpec {
                site: *site,
                cancellations: self.cancellations(cancellations)?,
            }),
            NodeType::Activity {
                interruptible,
                work_groups,
                cancellations,
                ..
            } => NodeKind::Activity(ActivitySpec {
                work_groups: self.work_groups(work_groups)?,
                cancellations: self.cancellations(cancellations)?,
                interruptible: *interruptible,
            }),
        };
        Ok(kind)
    }

    fn structured(&self, entry: &str, control: LoopControl) -> Result<NodeKind> {
        Ok(NodeKind::Structured(StructuredSpec {
            entry: self.resolve_target(entry)?,
            control,
        }))
    }

    fn work_groups(&self, defs: &[WorkGroupDef]) -> Result<Vec<WorkGroup>> {
        defs.iter()
            .map(|def| {
                let requirements = def
                    .resources
                    .iter()
                    .map(|(t, n)| Ok((self.resolve_type(t)?, *n)))
                    .collect::<Result<Vec<_>>>()?;
                let mut group = WorkGroup::new(def.priority, requirements);
                if let Some(condition) = &def.condition {
                    group = group.with_condition(Condition::parse(condition)?);
                }
                group = match (&def.flow, &def.duration) {
                    (Some(_), Some(_)) => {
                        return Err(anyhow!("A work group takes either a duration or a flow, not both"));
                    }
                    (Some(entry), None) => group.flow(self.resolve_target(entry)?),
                    (None, Some(duration)) => group.timed(Expression::parse(duration)?),
                    (None, None) => group,
                };
                Ok(group)
            })
            .collect()
    }

    fn cancellations(&self, defs: &BTreeMap<String, u64>) -> Result<Cancellations> {
        defs.iter()
            .map(|(t, d)| Ok((self.resolve_type(t)?, *d)))
            .collect()
    }

    fn resolve_type(&self, name: &str) -> Result<ResourceTypeId> {
        self.type_map
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Unknown resource type: {}", name))
    }

    fn resolve_target(&self, target_id: &str) -> Result<NodeIndex> {
        self.id_map
            .get(target_id)
            .cloned()
            .ok_or_else(|| anyhow!("Target node not found: {}", target_id))
    }
}
