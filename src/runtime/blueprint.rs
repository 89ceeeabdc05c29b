use std::collections::HashMap;

use serde_json::Value;

use crate::model::Model;
use crate::nodes::NodeIndex;
use crate::runtime::Timestamp;
use crate::runtime::simulation::SimulationConfig;

/// Compiled model ready to simulate.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub id: String,
    pub name: String,
    pub model: Model,
    pub arrivals: Vec<ArrivalPlan>,
    pub config: SimulationConfig,
}

impl Blueprint {
    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.model.graph().find(id)
    }
}

/// `count` entities enter at `root` starting at `at`, repeated `repeat`
/// times every `every` units.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalPlan {
    pub root: NodeIndex,
    pub at: Timestamp,
    pub count: u32,
    pub every: u64,
    pub repeat: u32,
    pub vars: HashMap<String, Value>,
}

impl ArrivalPlan {
    pub fn times(&self) -> impl Iterator<Item = Timestamp> + '_ {
        (0..self.repeat.max(1) as u64).map(move |r| self.at.saturating_add(r.saturating_mul(self.every)))
    }
}
