#![allow(dead_code)]

use std::collections::HashMap;

use simflow::compiler::core::Compiler;
use simflow::dsl::builder::ModelBuilder;
use simflow::nodes::NodeIndex;
use simflow::runtime::Timestamp;
use simflow::runtime::listener::{EventLog, FlowEvent, RecordingListener};
use simflow::runtime::simulation::{RunReport, Simulation};

/// Outcome of simulating a model to completion.
pub struct Run {
    pub log: EventLog,
    pub report: RunReport,
    nodes: HashMap<String, NodeIndex>,
}

impl Run {
    pub fn node(&self, id: &str) -> NodeIndex {
        *self.nodes.get(id).unwrap_or_else(|| panic!("no node '{}'", id))
    }

    /// `(time, executable)` of every request that reached `id`.
    pub fn requests(&self, id: &str) -> Vec<(Timestamp, bool)> {
        let node = self.node(id);
        self.log
            .events()
            .into_iter()
            .filter_map(|r| match r.event {
                FlowEvent::Request { node: n, executable, .. } if n == node => Some((r.at, executable)),
                _ => None,
            })
            .collect()
    }

    /// Times at which an executable token reached `id`.
    pub fn executable_at(&self, id: &str) -> Vec<Timestamp> {
        self.requests(id)
            .into_iter()
            .filter(|(_, executable)| *executable)
            .map(|(at, _)| at)
            .collect()
    }

    pub fn starts(&self, id: &str) -> Vec<Timestamp> {
        self.log.starts_of(self.node(id))
    }

    pub fn finishes(&self, id: &str) -> Vec<Timestamp> {
        self.log.finishes_of(self.node(id))
    }
}

pub fn simulate(builder: ModelBuilder) -> Run {
    let blueprint = Compiler::new()
        .compile(builder.build())
        .expect("Compilation failed");
    let nodes = blueprint
        .model
        .graph()
        .iter()
        .map(|(index, flow)| (flow.id.clone(), index))
        .collect();

    let mut sim = Simulation::from_blueprint(blueprint);
    let recorder = RecordingListener::new();
    let log = recorder.log();
    sim.add_listener(Box::new(recorder));
    let report = sim.run();

    Run { log, report, nodes }
}
