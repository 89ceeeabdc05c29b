use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::dsl::{
    EdgeDef, GeneratorDef, ModelDef, NodeDef, NodeType, ResourceDef, TimetableDef, WorkGroupDef,
};
use crate::runtime::simulation::SimulationConfig;

/// Fluent construction of a `ModelDef`, mostly for tests and embedding.
pub struct ModelBuilder {
    id: String,
    name: String,
    simulation: SimulationConfig,
    resource_types: Vec<String>,
    resources: Vec<ResourceDef>,
    pub nodes: Vec<NodeDef>,
    edges: Vec<EdgeDef>,
    generators: Vec<GeneratorDef>,
}

impl ModelBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            simulation: SimulationConfig::default(),
            resource_types: Vec::new(),
            resources: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            generators: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn seeds(mut self, choice: u64, tie_break: u64) -> Self {
        self.simulation.choice_seed = choice;
        self.simulation.tie_break_seed = tie_break;
        self
    }

    pub fn end_time(mut self, end: u64) -> Self {
        self.simulation.end_time = Some(end);
        self
    }

    pub fn resource_type(mut self, name: &str) -> Self {
        if !self.resource_types.iter().any(|t| t == name) {
            self.resource_types.push(name.to_string());
        }
        self
    }

    pub fn resource(mut self, id: &str, types: &[&str]) -> Self {
        self.resources.push(ResourceDef {
            id: id.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
            timetable: Vec::new(),
        });
        self
    }

    /// Adds an availability window to an already declared resource.
    pub fn timetable(mut self, resource: &str, resource_type: &str, start: u64, duration: u64, period: Option<u64>) -> Self {
        if let Some(r) = self.resources.iter_mut().find(|r| r.id == resource) {
            r.timetable.push(TimetableDef {
                resource_type: resource_type.to_string(),
                start,
                duration,
                period,
            });
        }
        self
    }

    pub fn node(mut self, id: &str, kind: NodeType) -> Self {
        self.nodes.push(NodeDef {
            id: id.to_string(),
            kind,
            guard: None,
        });
        self
    }

    pub fn pass(self, id: &str) -> Self {
        self.node(id, NodeType::Pass)
    }

    pub fn delay(self, id: &str, duration: &str) -> Self {
        self.node(id, NodeType::Delay { duration: duration.to_string() })
    }

    pub fn assign(self, id: &str, expression: &str) -> Self {
        self.node(id, NodeType::Assign { expression: expression.to_string() })
    }

    pub fn release(self, id: &str, site: u32) -> Self {
        self.node(id, NodeType::ReleaseResources { site, cancellations: BTreeMap::new() })
    }

    pub fn release_with_cancellation(self, id: &str, site: u32, resource_type: &str, duration: u64) -> Self {
        let cancellations = BTreeMap::from([(resource_type.to_string(), duration)]);
        self.node(id, NodeType::ReleaseResources { site, cancellations })
    }

    pub fn activity(self, id: &str) -> ResourceNodeBuilder {
        ResourceNodeBuilder::new(self, id, None)
    }

    pub fn request(self, id: &str, site: u32) -> ResourceNodeBuilder {
        ResourceNodeBuilder::new(self, id, Some(site))
    }

    /// Sets the admission guard of an already added node.
    pub fn guard(mut self, node: &str, condition: &str) -> Self {
        if let Some(n) = self.nodes.iter_mut().find(|n| n.id == node) {
            n.guard = Some(condition.to_string());
        }
        self
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.edges.push(EdgeDef {
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
            weight: None,
        });
        self
    }

    pub fn connect_if(mut self, source: &str, target: &str, condition: &str) -> Self {
        self.edges.push(EdgeDef {
            source: source.to_string(),
            target: target.to_string(),
            condition: Some(condition.to_string()),
            weight: None,
        });
        self
    }

    pub fn connect_weighted(mut self, source: &str, target: &str, weight: f64) -> Self {
        self.edges.push(EdgeDef {
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
            weight: Some(weight),
        });
        self
    }

    pub fn generator(mut self, flow: &str, at: u64, count: u32) -> Self {
        self.generators.push(GeneratorDef {
            flow: flow.to_string(),
            at,
            count,
            every: 0,
            repeat: 1,
            vars: HashMap::new(),
        });
        self
    }

    pub fn generator_def(mut self, generator: GeneratorDef) -> Self {
        self.generators.push(generator);
        self
    }

    /// Sets a variable on the most recently added generator.
    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(g) = self.generators.last_mut() {
            g.vars.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn build(self) -> ModelDef {
        ModelDef {
            id: self.id,
            name: self.name,
            simulation: self.simulation,
            resource_types: self.resource_types,
            resources: self.resources,
            nodes: self.nodes,
            edges: self.edges,
            generators: self.generators,
        }
    }
}

/// Builds an `Activity` node, or a `RequestResources` node when a site is given.
pub struct ResourceNodeBuilder {
    model_builder: ModelBuilder,
    id: String,
    site: Option<u32>,
    priority: i32,
    interruptible: bool,
    work_groups: Vec<WorkGroupDef>,
    cancellations: BTreeMap<String, u64>,
}

impl ResourceNodeBuilder {
    fn new(model_builder: ModelBuilder, id: &str, site: Option<u32>) -> Self {
        Self {
            model_builder,
            id: id.to_string(),
            site,
            priority: 0,
            interruptible: false,
            work_groups: Vec::new(),
            cancellations: BTreeMap::new(),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn interruptible(mut self) -> Self {
        self.interruptible = true;
        self
    }

    /// Timed work group.
    pub fn work_group(mut self, priority: i32, resources: &[(&str, u32)], duration: &str) -> Self {
        self.work_groups.push(WorkGroupDef {
            priority,
            resources: resources.iter().map(|(t, n)| (t.to_string(), *n)).collect(),
            condition: None,
            duration: Some(duration.to_string()),
            flow: None,
        });
        self
    }

    /// Adds an eligibility condition to the last work group.
    pub fn when(mut self, condition: &str) -> Self {
        if let Some(g) = self.work_groups.last_mut() {
            g.condition = Some(condition.to_string());
        }
        self
    }

    /// Work group that runs the sub-flow starting at `entry`.
    pub fn flow_group(mut self, priority: i32, resources: &[(&str, u32)], entry: &str) -> Self {
        self.work_groups.push(WorkGroupDef {
            priority,
            resources: resources.iter().map(|(t, n)| (t.to_string(), *n)).collect(),
            condition: None,
            duration: None,
            flow: Some(entry.to_string()),
        });
        self
    }

    pub fn cancellation(mut self, resource_type: &str, duration: u64) -> Self {
        self.cancellations.insert(resource_type.to_string(), duration);
        self
    }

    pub fn build(mut self) -> ModelBuilder {
        let kind = match self.site {
            Some(site) => NodeType::RequestResources {
                site,
                priority: self.priority,
                work_groups: self.work_groups,
            },
            None => NodeType::Activity {
                priority: self.priority,
                interruptible: self.interruptible,
                work_groups: self.work_groups,
                cancellations: self.cancellations,
            },
        };
        self.model_builder.nodes.push(NodeDef {
            id: self.id,
            kind,
            guard: None,
        });
        self.model_builder
    }
}
