use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::error::FlowError;
use crate::model::Model;
use crate::nodes::NodeIndex;
use crate::runtime::Timestamp;
use crate::runtime::blueprint::{ArrivalPlan, Blueprint};
use crate::runtime::context::EntityId;
use crate::runtime::engine::Engine;
use crate::runtime::listener::SimListener;
use crate::runtime::scheduler::{EventQueue, Scheduler};
use crate::runtime::task::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the probability-selection stream.
    pub choice_seed: u64,
    /// Seed of the work-group tie-break stream.
    pub tie_break_seed: u64,
    /// Stop before processing anything scheduled after this time.
    pub end_time: Option<Timestamp>,
    pub max_events: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            choice_seed: 1,
            tie_break_seed: 2,
            end_time: None,
            max_events: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub end_time: Timestamp,
    pub events_processed: u64,
    pub entities_created: u64,
    pub entities_finished: u64,
    /// Threads still queued for resources when the run stopped.
    pub waiting: usize,
}

/// An engine bound to its event queue.
pub struct Simulation {
    run_id: Uuid,
    engine: Engine,
    queue: EventQueue,
    config: SimulationConfig,
    started: bool,
    events_processed: u64,
}

impl Simulation {
    pub fn new(model: Model, config: SimulationConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            engine: Engine::new(model, config.choice_seed, config.tie_break_seed),
            queue: EventQueue::new(),
            config,
            started: false,
            events_processed: 0,
        }
    }

    pub fn from_blueprint(blueprint: Blueprint) -> Self {
        let mut sim = Self::new(blueprint.model, blueprint.config);
        for plan in &blueprint.arrivals {
            sim.schedule_arrivals(plan);
        }
        sim
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn now(&self) -> Timestamp {
        self.queue.now()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn validation_errors(&self) -> &[FlowError] {
        self.engine.validation_errors()
    }

    pub fn add_listener(&mut self, listener: Box<dyn SimListener>) {
        self.engine.add_listener(listener);
    }

    pub fn schedule_arrival(&mut self, at: Timestamp, root: NodeIndex, vars: HashMap<String, Value>) {
        self.queue.schedule(at, Task::Arrival { root, vars });
    }

    pub fn schedule_arrivals(&mut self, plan: &ArrivalPlan) {
        for at in plan.times() {
            for _ in 0..plan.count {
                self.schedule_arrival(at, plan.root, plan.vars.clone());
            }
        }
    }

    /// Creates an entity right now and injects its first thread at `root`.
    pub fn spawn_entity(&mut self, root: NodeIndex, vars: HashMap<String, Value>) -> EntityId {
        self.ensure_started();
        let entity = self.engine.register_entity(vars, self.queue.now());
        self.engine.request_token(root, entity, &mut self.queue);
        entity
    }

    fn ensure_started(&mut self) {
        if !self.started {
            self.started = true;
            self.engine.start(&mut self.queue);
        }
    }

    /// Processes one task. Returns `false` once the queue is exhausted or a
    /// limit was reached.
    pub fn step(&mut self) -> bool {
        self.ensure_started();
        if self
            .config
            .max_events
            .is_some_and(|max| self.events_processed >= max)
        {
            return false;
        }
        let Some(at) = self.queue.peek_time() else {
            return false;
        };
        if let Some(end) = self.config.end_time {
            if at > end {
                self.queue.advance_to(end);
                return false;
            }
        }
        let Some((_, task)) = self.queue.pop() else {
            return false;
        };
        self.events_processed += 1;
        self.engine.handle(task, &mut self.queue);
        true
    }

    pub fn run(&mut self) -> RunReport {
        let span = info_span!("simulation", run_id = %self.run_id);
        let _enter = span.enter();
        info!(pending = self.queue.len(), "Simulation started");
        while self.step() {}
        let report = self.report();
        info!(
            end_time = report.end_time,
            events = report.events_processed,
            finished = report.entities_finished,
            waiting = report.waiting,
            "Simulation stopped"
        );
        report
    }

    pub fn run_until(&mut self, end: Timestamp) -> RunReport {
        self.config.end_time = Some(end);
        self.run()
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            end_time: self.queue.now(),
            events_processed: self.events_processed,
            entities_created: self.engine.entities_created(),
            entities_finished: self.engine.entities_finished(),
            waiting: self.engine.waiting(),
        }
    }
}
