pub mod builder;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::simulation::SimulationConfig;

/// A model as written in YAML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub resources: Vec<ResourceDef>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    #[serde(default)]
    pub generators: Vec<GeneratorDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDef {
    pub id: String,
    /// Roles held at all times.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timetable: Vec<TimetableDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimetableDef {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub start: u64,
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
}

/// Node kinds available in the DSL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NodeType {
    Pass,
    Delay {
        duration: String,
    },
    /// `var = expression`
    Assign {
        expression: String,
    },

    // --- splits ---
    Parallel,
    ExclusiveChoice,
    MultiChoice,
    ProbabilitySelection,
    ThreadSplit {
        copies: usize,
    },

    // --- merges ---
    SimpleMerge,
    Synchronization {
        #[serde(default)]
        accept: Option<usize>,
    },
    MultiMerge,
    GeneralizedAndJoin {
        #[serde(default)]
        accept: Option<usize>,
    },
    GeneralizedOrJoin,
    ThreadMerge {
        threads: usize,
        #[serde(default)]
        accept: Option<usize>,
    },

    // --- structured ---
    Structured {
        entry: String,
    },
    ForLoop {
        entry: String,
        iterations: String,
    },
    WhileDo {
        entry: String,
        condition: String,
    },
    DoWhile {
        entry: String,
        condition: String,
    },

    // --- resources ---
    RequestResources {
        site: u32,
        #[serde(default)]
        priority: i32,
        #[serde(default)]
        work_groups: Vec<WorkGroupDef>,
    },
    ReleaseResources {
        site: u32,
        /// Resource type -> unavailable time after release.
        #[serde(default)]
        cancellations: BTreeMap<String, u64>,
    },
    Activity {
        #[serde(default)]
        priority: i32,
        #[serde(default)]
        interruptible: bool,
        #[serde(default)]
        work_groups: Vec<WorkGroupDef>,
        #[serde(default)]
        cancellations: BTreeMap<String, u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDef {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeType,
    /// Admission guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeDef {
    pub source: String,
    pub target: String,
    /// Branch guard on choice splits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Branch weight on probability selections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkGroupDef {
    #[serde(default)]
    pub priority: i32,
    /// Resource type -> quantity.
    #[serde(default)]
    pub resources: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Entry node of the sub-flow run while the resources are held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorDef {
    /// Root node entities enter at.
    pub flow: String,
    #[serde(default)]
    pub at: u64,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default)]
    pub every: u64,
    #[serde(default = "one")]
    pub repeat: u32,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
}
