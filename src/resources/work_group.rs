use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::actions::{Condition, EvalScope, Expression};
use crate::error::FlowError;
use crate::nodes::NodeIndex;
use crate::resources::{ResourceCatalog, ResourceId, ResourceTypeId};
use crate::runtime::Timestamp;

/// What a node does once a work group is granted.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Holds the resources for the evaluated duration.
    Timed(Expression),
    /// Runs an inner graph starting at `entry`; the activity finishes when it exits.
    Flow { entry: NodeIndex },
}

/// One alternative way of satisfying a resource-consuming node.
#[derive(Debug, Clone)]
pub struct WorkGroup {
    /// Lower values are tried first.
    pub priority: i32,
    pub requirements: Vec<(ResourceTypeId, u32)>,
    pub condition: Condition,
    pub behavior: Behavior,
}

impl WorkGroup {
    pub fn new(priority: i32, requirements: Vec<(ResourceTypeId, u32)>) -> Self {
        Self {
            priority,
            requirements,
            condition: Condition::always(),
            behavior: Behavior::Timed(Expression::constant(0)),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn timed(mut self, duration: Expression) -> Self {
        self.behavior = Behavior::Timed(duration);
        self
    }

    pub fn flow(mut self, entry: NodeIndex) -> Self {
        self.behavior = Behavior::Flow { entry };
        self
    }

    pub fn flow_entry(&self) -> Option<NodeIndex> {
        match self.behavior {
            Behavior::Flow { entry } => Some(entry),
            Behavior::Timed(_) => None,
        }
    }

    pub fn types(&self) -> impl Iterator<Item = ResourceTypeId> + '_ {
        self.requirements.iter().map(|(t, _)| *t)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Index into the node's work groups.
    pub group: usize,
    pub resources: Vec<(ResourceId, ResourceTypeId)>,
}

/// Chooses a work group for a request.
///
/// Groups are tried in ascending priority; groups sharing a priority are
/// tried in an order shuffled by the tie-break stream.
pub struct WorkGroupResolver {
    rng: StdRng,
}

impl WorkGroupResolver {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn order(&mut self, groups: &[WorkGroup]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..groups.len()).collect();
        order.sort_by_key(|i| groups[*i].priority);
        let mut start = 0;
        while start < order.len() {
            let priority = groups[order[start]].priority;
            let end = order[start..]
                .iter()
                .position(|i| groups[*i].priority != priority)
                .map_or(order.len(), |p| start + p);
            if end - start > 1 {
                order[start..end].shuffle(&mut self.rng);
            }
            start = end;
        }
        order
    }

    /// First eligible group whose requirements can be met right now.
    /// Eligibility failures that come from bad expressions land in `errors`.
    pub fn resolve(
        &mut self,
        groups: &[WorkGroup],
        catalog: &ResourceCatalog,
        scope: &EvalScope,
        now: Timestamp,
        errors: &mut Vec<FlowError>,
    ) -> Option<Allocation> {
        for group in self.order(groups) {
            let wg = &groups[group];
            match wg.condition.evaluate(scope) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            }
            if let Some(resources) = catalog.find_allocation(&wg.requirements, now) {
                return Some(Allocation { group, resources });
            }
        }
        None
    }
}
