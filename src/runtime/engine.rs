use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::debug;

use crate::actions::{Condition, EvalScope, Expression};
use crate::error::FlowError;
use crate::model::Model;
use crate::nodes::{
    Cancellations, Flow, FlowGraph, LoopControl, MergeSpec, NodeIndex, NodeKind, SiteId,
    SplitKind, SplitSpec, StructuredSpec,
};
use crate::nodes::structured::LoopState;
use crate::resources::manager::{ManagerId, ManagerSet};
use crate::resources::work_group::{Allocation, Behavior, WorkGroup, WorkGroupResolver};
use crate::resources::{Holder, ResourceCatalog, ResourceId, ResourceState};
use crate::runtime::Timestamp;
use crate::runtime::context::{EntityContext, EntityId};
use crate::runtime::listener::{FlowEvent, SimListener};
use crate::runtime::merge::MergeControl;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::task::Task;
use crate::runtime::thread::{Execution, Held, ThreadArena, ThreadId};

/// Moves work threads through a model.
///
/// The engine never owns the clock: every transition receives the
/// `Scheduler` it runs under and schedules follow-up work on it, so a single
/// step never recurses into another node's `request`.
pub struct Engine {
    graph: Arc<FlowGraph>,
    catalog: ResourceCatalog,
    managers: ManagerSet,
    resolver: WorkGroupResolver,
    choice_rng: StdRng,
    threads: ThreadArena,
    entities: HashMap<EntityId, EntityContext>,
    merges: MergeControl,
    loops: HashMap<(NodeIndex, ThreadId), LoopState>,
    listeners: Vec<Box<dyn SimListener>>,
    validation: Vec<FlowError>,
    next_entity: u64,
    entities_created: u64,
    entities_finished: u64,
}

impl Engine {
    pub fn new(mut model: Model, choice_seed: u64, tie_break_seed: u64) -> Self {
        let validation = model.validate();
        let managers = ManagerSet::build(&model.graph, &model.catalog);
        Self {
            graph: Arc::new(model.graph),
            catalog: model.catalog,
            managers,
            resolver: WorkGroupResolver::new(tie_break_seed),
            choice_rng: StdRng::seed_from_u64(choice_seed),
            threads: ThreadArena::new(),
            entities: HashMap::new(),
            merges: MergeControl::new(),
            loops: HashMap::new(),
            listeners: Vec::new(),
            validation,
            next_entity: 0,
            entities_created: 0,
            entities_finished: 0,
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn SimListener>) {
        self.listeners.push(listener);
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn validation_errors(&self) -> &[FlowError] {
        &self.validation
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityContext> {
        self.entities.get(&id)
    }

    pub fn live_entities(&self) -> usize {
        self.entities.len()
    }

    /// Threads parked in activity manager queues.
    pub fn waiting(&self) -> usize {
        self.managers.waiting()
    }

    pub fn entities_created(&self) -> u64 {
        self.entities_created
    }

    pub fn entities_finished(&self) -> u64 {
        self.entities_finished
    }

    /// Reports construction problems and opens the resource timetables.
    pub fn start(&mut self, sched: &mut dyn Scheduler) {
        let now = sched.now();
        for error in self.validation.clone() {
            self.report(now, error);
        }
        for (resource, r) in self.catalog.resources() {
            for (entry, window) in r.timetable.iter().enumerate() {
                sched.schedule(window.start, Task::RoleOn { resource, entry });
            }
        }
    }

    pub fn register_entity(&mut self, vars: HashMap<String, Value>, now: Timestamp) -> EntityId {
        self.next_entity += 1;
        let id = EntityId(self.next_entity);
        self.entities.insert(id, EntityContext::new(id, now, vars));
        self.entities_created += 1;
        self.emit(now, FlowEvent::EntityCreated { entity: id });
        id
    }

    /// Injects a fresh executable thread for `entity` at `root`.
    pub fn request_token(
        &mut self,
        root: NodeIndex,
        entity: EntityId,
        sched: &mut dyn Scheduler,
    ) -> Option<ThreadId> {
        let now = sched.now();
        if !self.entities.contains_key(&entity) {
            self.entities.insert(entity, EntityContext::new(entity, now, HashMap::new()));
            self.entities_created += 1;
            self.emit(now, FlowEvent::EntityCreated { entity });
        }
        if self.graph.get(root).is_none() {
            self.report(now, FlowError::UnknownNode(root));
            return None;
        }
        let thread = self.threads.spawn_root(entity);
        sched.schedule(now, Task::Request { thread, node: root });
        Some(thread)
    }

    pub fn handle(&mut self, task: Task, sched: &mut dyn Scheduler) {
        match task {
            Task::Arrival { root, vars } => {
                let entity = self.register_entity(vars, sched.now());
                self.request_token(root, entity, sched);
            }
            Task::Request { thread, node } => self.request(node, thread, sched),
            Task::Finish {
                thread,
                node,
                generation,
            } => {
                let current = self.threads.get(thread).map(|t| t.generation);
                if current != Some(generation) {
                    debug!(thread = %thread, node, "Stale finish ignored");
                    return;
                }
                self.finish(node, thread, sched);
            }
            Task::CancellationEnd { resource } => self.end_cancellation(resource, sched),
            Task::RoleOn { resource, entry } => self.role_on(resource, entry, sched),
            Task::RoleOff { resource, entry } => self.role_off(resource, entry, sched),
        }
    }

    fn emit(&mut self, now: Timestamp, event: FlowEvent) {
        for listener in &mut self.listeners {
            listener.on_event(now, &event);
        }
    }

    fn report(&mut self, now: Timestamp, error: FlowError) {
        self.emit(now, FlowEvent::Error { error });
    }

    fn scope(&self, entity: EntityId, now: Timestamp) -> EvalScope {
        match self.entities.get(&entity) {
            Some(ctx) => ctx.scope(now),
            None => EvalScope::new(&HashMap::new(), now, entity.0),
        }
    }

    /// Bad expressions count as `false`.
    fn check(&mut self, condition: &Condition, entity: EntityId, now: Timestamp) -> bool {
        let result = condition.evaluate(&self.scope(entity, now));
        result.unwrap_or_else(|e| {
            self.report(now, e);
            false
        })
    }

    /// Bad expressions count as `0`.
    fn eval(&mut self, expr: &Expression, entity: EntityId, now: Timestamp) -> u64 {
        let result = expr.evaluate(&self.scope(entity, now));
        result.unwrap_or_else(|e| {
            self.report(now, e);
            0
        })
    }

    // ---- request / finish / next ----

    fn request(&mut self, node: NodeIndex, tid: ThreadId, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let graph = Arc::clone(&self.graph);
        let Some(thread) = self.threads.get(tid) else {
            debug!(thread = %tid, node, "Request for reclaimed thread ignored");
            return;
        };
        let (entity, executable) = (thread.entity, thread.executable);
        let Some(flow) = graph.get(node) else {
            self.report(now, FlowError::UnknownNode(node));
            self.end_thread(tid, sched);
            return;
        };
        self.emit(
            now,
            FlowEvent::Request {
                entity,
                thread: tid,
                node,
                executable,
            },
        );

        if let NodeKind::Merge(spec) = &flow.kind {
            self.merge_arrival(node, spec, tid, sched);
            return;
        }
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        // A false token coming back to a node it already carried ends here.
        if thread.was_visited(node) {
            self.end_thread(tid, sched);
            return;
        }
        if !executable {
            thread.visit(node);
            self.next(node, tid, sched);
            return;
        }
        if let Some(guard) = &flow.guard {
            if !self.check(guard, entity, now) {
                if let Some(thread) = self.threads.get_mut(tid) {
                    thread.cancel(node);
                }
                self.next(node, tid, sched);
                return;
            }
        }
        self.execute(node, flow, tid, entity, sched);
    }

    fn execute(
        &mut self,
        node: NodeIndex,
        flow: &Flow,
        tid: ThreadId,
        entity: EntityId,
        sched: &mut dyn Scheduler,
    ) {
        let now = sched.now();
        match &flow.kind {
            NodeKind::Pass | NodeKind::Split(_) | NodeKind::Merge(_) => self.next(node, tid, sched),
            NodeKind::Assign(assignment) => {
                let scope = self.scope(entity, now);
                let result = match self.entities.get_mut(&entity) {
                    Some(ctx) => assignment.apply(&scope, &mut ctx.vars),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.report(now, e);
                }
                self.next(node, tid, sched);
            }
            NodeKind::Delay(duration) => {
                let duration = self.eval(duration, entity, now);
                self.emit(
                    now,
                    FlowEvent::Start {
                        entity,
                        thread: tid,
                        node,
                        work_group: None,
                    },
                );
                let generation = self.threads.get(tid).map_or(0, |t| t.generation);
                sched.schedule(
                    now.saturating_add(duration),
                    Task::Finish {
                        thread: tid,
                        node,
                        generation,
                    },
                );
            }
            NodeKind::Structured(spec) => self.enter_structured(node, spec, tid, entity, sched),
            NodeKind::RequestResources(_) | NodeKind::Activity(_) => {
                self.acquire(node, flow, tid, entity, sched)
            }
            NodeKind::ReleaseResources(spec) => {
                self.release(node, SiteId::Named(spec.site), tid, &spec.cancellations, sched);
                self.next(node, tid, sched);
            }
        }
    }

    fn finish(&mut self, node: NodeIndex, tid: ThreadId, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let graph = Arc::clone(&self.graph);
        let Some(flow) = graph.get(node) else {
            return;
        };
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        let entity = thread.entity;
        if thread.execution.is_some_and(|e| e.node == node) {
            thread.execution = None;
        }
        self.emit(
            now,
            FlowEvent::Finish {
                entity,
                thread: tid,
                node,
            },
        );
        if let NodeKind::Activity(spec) = &flow.kind {
            self.release(node, SiteId::Activity(node), tid, &spec.cancellations, sched);
        }
        self.next(node, tid, sched);
    }

    fn next(&mut self, node: NodeIndex, tid: ThreadId, sched: &mut dyn Scheduler) {
        let graph = Arc::clone(&self.graph);
        let Some(flow) = graph.get(node) else {
            return;
        };
        match self.threads.get_mut(tid) {
            Some(thread) => thread.last_node = Some(node),
            None => return,
        }
        if let NodeKind::Split(spec) = &flow.kind {
            self.split(node, spec, tid, sched);
            return;
        }
        match flow.next {
            Some(successor) => sched.schedule(
                sched.now(),
                Task::Request {
                    thread: tid,
                    node: successor,
                },
            ),
            None => self.leave(node, flow, tid, sched),
        }
    }

    /// The thread ran out of successors: either an inner graph exit or the
    /// end of the entity's path.
    fn leave(&mut self, node: NodeIndex, flow: &Flow, tid: ThreadId, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let Some(thread) = self.threads.get(tid) else {
            return;
        };
        let (entity, executable, scope) = (thread.entity, thread.executable, thread.scope);
        let path = thread.path.clone();
        if let Some(owner) = flow.owner {
            match scope {
                Some(wrapper) => {
                    self.end_thread(tid, sched);
                    self.resume_wrapper(owner, wrapper, sched);
                    return;
                }
                None => self.report(
                    now,
                    FlowError::invariant(node, "inner graph exit reached without a waiting wrapper"),
                ),
            }
        }
        self.emit(
            now,
            FlowEvent::TokenTerminated {
                entity,
                thread: tid,
                node,
                executable,
                path,
            },
        );
        self.end_thread(tid, sched);
    }

    fn resume_wrapper(&mut self, owner: NodeIndex, wrapper: ThreadId, sched: &mut dyn Scheduler) {
        let graph = Arc::clone(&self.graph);
        match graph.get(owner).map(|f| &f.kind) {
            Some(NodeKind::Structured(spec)) => self.continue_loop(owner, spec, wrapper, sched),
            Some(NodeKind::Activity(_)) | Some(NodeKind::RequestResources(_)) => {
                self.finish(owner, wrapper, sched)
            }
            _ => self.report(
                sched.now(),
                FlowError::invariant(owner, "node does not drive an inner graph"),
            ),
        }
    }

    fn end_thread(&mut self, tid: ThreadId, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let reclaimed = self.threads.end(tid);
        let mut leaked = Vec::new();
        for thread in reclaimed.threads {
            leaked.extend(thread.held.into_values().flatten());
        }
        if !leaked.is_empty() {
            self.reclaim_leaked(leaked, sched);
        }
        for entity in reclaimed.finished {
            if let Some(ctx) = self.entities.remove(&entity) {
                let leaked: Vec<Held> = ctx.held.into_values().flatten().collect();
                if !leaked.is_empty() {
                    self.reclaim_leaked(leaked, sched);
                }
            }
            for (merge, pending) in self.merges.forget(entity) {
                self.report(
                    now,
                    FlowError::invariant(
                        merge,
                        format!("entity {} ended with {} arrivals pending at the merge", entity, pending),
                    ),
                );
            }
            self.entities_finished += 1;
            self.emit(now, FlowEvent::EntityFinished { entity });
        }
    }

    /// Frees resources whose owner disappeared without releasing them.
    fn reclaim_leaked(&mut self, leaked: Vec<Held>, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let mut touched = BTreeSet::new();
        for held in leaked {
            let node = self.catalog.holder(held.resource).map_or(0, |h| h.node);
            self.report(
                now,
                FlowError::invariant(node, format!("resource {} was never released", held.resource.0)),
            );
            self.catalog.free(held.resource);
            touched.extend(self.managers.for_resource(&self.catalog, held.resource));
        }
        for manager in touched {
            self.retry(manager, sched);
        }
    }

    // ---- splits and merges ----

    fn split(&mut self, node: NodeIndex, spec: &SplitSpec, tid: ThreadId, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let Some(thread) = self.threads.get(tid) else {
            return;
        };
        let (entity, executable) = (thread.entity, thread.executable);
        let mut plan = Vec::with_capacity(spec.branches.len());
        match spec.kind {
            SplitKind::Parallel => {
                plan.extend(spec.branches.iter().map(|b| (b.target, executable)));
            }
            SplitKind::ExclusiveChoice => {
                let mut matched = false;
                for branch in &spec.branches {
                    // Later guards are not evaluated once a branch matched.
                    let take = executable && !matched && self.check(&branch.guard, entity, now);
                    matched |= take;
                    plan.push((branch.target, take));
                }
            }
            SplitKind::MultiChoice => {
                for branch in &spec.branches {
                    let take = executable && self.check(&branch.guard, entity, now);
                    plan.push((branch.target, take));
                }
            }
            SplitKind::ProbabilitySelection => {
                let winner = if executable { self.draw(node, spec, now) } else { None };
                plan.extend(
                    spec.branches
                        .iter()
                        .enumerate()
                        .map(|(i, b)| (b.target, winner == Some(i))),
                );
            }
            SplitKind::Thread { copies } => {
                for branch in &spec.branches {
                    plan.extend(std::iter::repeat_n((branch.target, executable), copies));
                }
            }
        }

        for (target, take) in plan {
            let Some(child) = self.threads.spawn_child(tid, take) else {
                continue;
            };
            if let Some(thread) = self.threads.get_mut(child) {
                thread.last_node = Some(node);
                if executable && !take {
                    thread.cancel(node);
                }
            }
            sched.schedule(now, Task::Request { thread: child, node: target });
        }
        self.end_thread(tid, sched);
    }

    fn draw(&mut self, node: NodeIndex, spec: &SplitSpec, now: Timestamp) -> Option<usize> {
        let total = spec.total_weight();
        if total <= 0.0 {
            self.report(
                now,
                FlowError::configuration(node, "probability selection has no positive weight"),
            );
            return None;
        }
        let mut point = self.choice_rng.random::<f64>() * total;
        for (i, branch) in spec.branches.iter().enumerate() {
            if branch.weight <= 0.0 {
                continue;
            }
            if point < branch.weight {
                return Some(i);
            }
            point -= branch.weight;
        }
        spec.branches.iter().rposition(|b| b.weight > 0.0)
    }

    fn merge_arrival(&mut self, node: NodeIndex, spec: &MergeSpec, tid: ThreadId, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let Some(thread) = self.threads.get(tid) else {
            return;
        };
        let (entity, executable, edge) = (thread.entity, thread.executable, thread.last_node);
        let path = thread.path.clone();
        let continuations = self
            .merges
            .arrive(node, spec, entity, edge, executable, &path, now);
        for continuation in continuations {
            if let Some(next) = self
                .threads
                .spawn_sibling(tid, continuation.executable, continuation.path)
            {
                self.next(node, next, sched);
            }
        }
        self.end_thread(tid, sched);
    }

    // ---- structured nodes ----

    fn enter_structured(
        &mut self,
        node: NodeIndex,
        spec: &StructuredSpec,
        tid: ThreadId,
        entity: EntityId,
        sched: &mut dyn Scheduler,
    ) {
        let now = sched.now();
        let mut state = LoopState::default();
        let proceed = match &spec.control {
            LoopControl::Once | LoopControl::DoWhile(_) => true,
            LoopControl::For(count) => {
                state.remaining = self.eval(count, entity, now);
                state.remaining > 0
            }
            LoopControl::WhileDo(condition) => self.check(condition, entity, now),
        };
        self.emit(
            now,
            FlowEvent::Start {
                entity,
                thread: tid,
                node,
                work_group: None,
            },
        );
        if proceed {
            self.loops.insert((node, tid), state);
            self.iterate(node, spec.entry, tid, sched);
        } else {
            self.complete_loop(node, tid, sched);
        }
    }

    fn iterate(&mut self, node: NodeIndex, entry: NodeIndex, wrapper: ThreadId, sched: &mut dyn Scheduler) {
        if let Some(state) = self.loops.get_mut(&(node, wrapper)) {
            state.iteration += 1;
        }
        if let Some(child) = self.threads.spawn_scoped(wrapper) {
            sched.schedule(sched.now(), Task::Request { thread: child, node: entry });
        }
    }

    fn continue_loop(
        &mut self,
        node: NodeIndex,
        spec: &StructuredSpec,
        wrapper: ThreadId,
        sched: &mut dyn Scheduler,
    ) {
        let now = sched.now();
        let Some(entity) = self.threads.get(wrapper).map(|t| t.entity) else {
            return;
        };
        let again = match &spec.control {
            LoopControl::Once => false,
            LoopControl::For(_) => {
                let state = self.loops.entry((node, wrapper)).or_default();
                state.remaining = state.remaining.saturating_sub(1);
                state.remaining > 0
            }
            LoopControl::WhileDo(condition) | LoopControl::DoWhile(condition) => {
                self.check(condition, entity, now)
            }
        };
        if again {
            self.iterate(node, spec.entry, wrapper, sched);
        } else {
            self.complete_loop(node, wrapper, sched);
        }
    }

    fn complete_loop(&mut self, node: NodeIndex, wrapper: ThreadId, sched: &mut dyn Scheduler) {
        let iterations = self
            .loops
            .remove(&(node, wrapper))
            .map_or(0, |s| s.iteration);
        debug!(node, thread = %wrapper, iterations, "Structured node completed");
        let Some(entity) = self.threads.get(wrapper).map(|t| t.entity) else {
            return;
        };
        self.emit(
            sched.now(),
            FlowEvent::Finish {
                entity,
                thread: wrapper,
                node,
            },
        );
        self.next(node, wrapper, sched);
    }

    // ---- resources ----

    fn acquire(
        &mut self,
        node: NodeIndex,
        flow: &Flow,
        tid: ThreadId,
        entity: EntityId,
        sched: &mut dyn Scheduler,
    ) {
        let now = sched.now();
        let groups = flow.kind.work_groups().unwrap_or(&[]);
        let manager = self.managers.for_node(node);
        let Some(manager) = manager.filter(|_| !groups.is_empty()) else {
            self.report(now, FlowError::configuration(node, "no work groups defined"));
            if let Some(thread) = self.threads.get_mut(tid) {
                thread.cancel(node);
            }
            self.next(node, tid, sched);
            return;
        };
        let feasible = self.managers.get(manager).is_some_and(|m| m.is_feasible(node));
        if feasible {
            if let Some(allocation) = self.try_allocate(groups, entity, now) {
                self.begin(node, flow, tid, allocation, sched);
                return;
            }
            if let Some(m) = self.managers.get_mut(manager) {
                m.set_infeasible(node);
            }
        }
        self.enqueue(manager, node, flow.priority, tid, entity, now);
    }

    fn try_allocate(&mut self, groups: &[WorkGroup], entity: EntityId, now: Timestamp) -> Option<Allocation> {
        let scope = self.scope(entity, now);
        let mut errors = Vec::new();
        let allocation = self
            .resolver
            .resolve(groups, &self.catalog, &scope, now, &mut errors);
        for error in errors {
            self.report(now, error);
        }
        allocation
    }

    fn enqueue(
        &mut self,
        manager: ManagerId,
        node: NodeIndex,
        priority: i32,
        tid: ThreadId,
        entity: EntityId,
        now: Timestamp,
    ) {
        if let Some(m) = self.managers.get_mut(manager) {
            m.enqueue(tid, node, priority);
        }
        self.emit(
            now,
            FlowEvent::Queued {
                entity,
                thread: tid,
                node,
            },
        );
    }

    fn begin(
        &mut self,
        node: NodeIndex,
        flow: &Flow,
        tid: ThreadId,
        allocation: Allocation,
        sched: &mut dyn Scheduler,
    ) {
        let now = sched.now();
        let Some(entity) = self.threads.get(tid).map(|t| t.entity) else {
            return;
        };
        let site = match &flow.kind {
            NodeKind::RequestResources(spec) => SiteId::Named(spec.site),
            _ => SiteId::Activity(node),
        };
        let mut held = Vec::with_capacity(allocation.resources.len());
        for (resource, as_type) in allocation.resources {
            self.catalog.hold(
                resource,
                Holder {
                    entity,
                    thread: tid,
                    node,
                    as_type,
                },
            );
            held.push(Held { resource, as_type });
            self.emit(
                now,
                FlowEvent::ResourceAcquired {
                    entity,
                    node,
                    resource,
                    as_type,
                },
            );
        }
        self.store_held(site, entity, tid, held);
        self.emit(
            now,
            FlowEvent::Start {
                entity,
                thread: tid,
                node,
                work_group: Some(allocation.group),
            },
        );

        let behavior = flow
            .kind
            .work_groups()
            .and_then(|groups| groups.get(allocation.group))
            .map(|g| g.behavior.clone());
        match behavior {
            Some(Behavior::Flow { entry }) => {
                if let Some(thread) = self.threads.get_mut(tid) {
                    thread.execution = Some(Execution { node, finish_at: None });
                }
                if let Some(child) = self.threads.spawn_scoped(tid) {
                    sched.schedule(now, Task::Request { thread: child, node: entry });
                }
            }
            timed => {
                let resumed = self.threads.get_mut(tid).and_then(|t| t.resume.take());
                let duration = match (resumed, timed) {
                    (Some(remaining), _) => remaining,
                    (None, Some(Behavior::Timed(expr))) => self.eval(&expr, entity, now),
                    (None, _) => 0,
                };
                let finish_at = now.saturating_add(duration);
                let Some(thread) = self.threads.get_mut(tid) else {
                    return;
                };
                thread.execution = Some(Execution {
                    node,
                    finish_at: Some(finish_at),
                });
                let generation = thread.generation;
                sched.schedule(
                    finish_at,
                    Task::Finish {
                        thread: tid,
                        node,
                        generation,
                    },
                );
            }
        }
    }

    fn store_held(&mut self, site: SiteId, entity: EntityId, tid: ThreadId, held: Vec<Held>) {
        match site {
            SiteId::Named(id) => {
                if let Some(ctx) = self.entities.get_mut(&entity) {
                    ctx.held.entry(id).or_default().extend(held);
                }
            }
            SiteId::Activity(_) => {
                if let Some(thread) = self.threads.get_mut(tid) {
                    thread.held.entry(site).or_default().extend(held);
                }
            }
        }
    }

    fn take_held(&mut self, site: SiteId, entity: EntityId, tid: ThreadId) -> Vec<Held> {
        match site {
            SiteId::Named(id) => self
                .entities
                .get_mut(&entity)
                .and_then(|ctx| ctx.held.remove(&id))
                .unwrap_or_default(),
            SiteId::Activity(_) => self
                .threads
                .get_mut(tid)
                .and_then(|t| t.held.remove(&site))
                .unwrap_or_default(),
        }
    }

    fn release(
        &mut self,
        node: NodeIndex,
        site: SiteId,
        tid: ThreadId,
        cancellations: &Cancellations,
        sched: &mut dyn Scheduler,
    ) {
        let now = sched.now();
        let Some(entity) = self.threads.get(tid).map(|t| t.entity) else {
            return;
        };
        let held = self.take_held(site, entity, tid);
        if held.is_empty() {
            // Zero-quantity groups leave an activity with nothing to give back.
            if let SiteId::Named(id) = site {
                self.report(
                    now,
                    FlowError::invariant(node, format!("no resources held under site {}", id)),
                );
            }
            return;
        }
        let mut touched = BTreeSet::new();
        for Held { resource, as_type } in held {
            self.emit(
                now,
                FlowEvent::ResourceReleased {
                    entity,
                    node,
                    resource,
                },
            );
            match cancellations.get(&as_type).copied().filter(|d| *d > 0) {
                Some(duration) => {
                    let until = now.saturating_add(duration);
                    self.catalog.cancel(resource, until);
                    self.emit(now, FlowEvent::CancelOn { resource, until });
                    sched.schedule(until, Task::CancellationEnd { resource });
                }
                None => {
                    self.catalog.free(resource);
                    touched.extend(self.managers.for_resource(&self.catalog, resource));
                }
            }
        }
        for manager in touched {
            self.retry(manager, sched);
        }
    }

    /// Serves queued requests in priority order after resources came back.
    fn retry(&mut self, manager: ManagerId, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let graph = Arc::clone(&self.graph);
        let queued = match self.managers.get_mut(manager) {
            Some(m) => {
                m.rearm();
                m.queued()
            }
            None => return,
        };
        for (key, request) in queued {
            let feasible = self
                .managers
                .get(manager)
                .is_some_and(|m| m.is_feasible(request.node));
            if !feasible {
                continue;
            }
            let (Some(entity), Some(flow)) = (
                self.threads.get(request.thread).map(|t| t.entity),
                graph.get(request.node),
            ) else {
                if let Some(m) = self.managers.get_mut(manager) {
                    m.remove(&key);
                }
                continue;
            };
            let groups = flow.kind.work_groups().unwrap_or(&[]);
            match self.try_allocate(groups, entity, now) {
                Some(allocation) => {
                    if let Some(m) = self.managers.get_mut(manager) {
                        m.remove(&key);
                    }
                    self.begin(request.node, flow, request.thread, allocation, sched);
                }
                None => {
                    if let Some(m) = self.managers.get_mut(manager) {
                        m.set_infeasible(request.node);
                    }
                }
            }
        }
    }

    fn end_cancellation(&mut self, resource: ResourceId, sched: &mut dyn Scheduler) {
        let cancelled = self
            .catalog
            .resource(resource)
            .is_some_and(|r| matches!(r.state, ResourceState::Cancelled { .. }));
        if !cancelled {
            return;
        }
        self.catalog.free(resource);
        self.emit(sched.now(), FlowEvent::CancelOff { resource });
        for manager in self.managers.for_resource(&self.catalog, resource) {
            self.retry(manager, sched);
        }
    }

    fn role_on(&mut self, resource: ResourceId, entry: usize, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let Some(window) = self
            .catalog
            .resource(resource)
            .and_then(|r| r.timetable.get(entry))
            .cloned()
        else {
            return;
        };
        self.emit(
            now,
            FlowEvent::RoleOn {
                resource,
                resource_type: window.resource_type,
            },
        );
        sched.schedule(now.saturating_add(window.duration), Task::RoleOff { resource, entry });
        if let Some(manager) = self.managers.for_type(window.resource_type) {
            self.retry(manager, sched);
        }
    }

    fn role_off(&mut self, resource: ResourceId, entry: usize, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let Some(r) = self.catalog.resource(resource) else {
            return;
        };
        let Some(window) = r.timetable.get(entry).cloned() else {
            return;
        };
        let still_plays = r.plays(window.resource_type, now);
        self.emit(
            now,
            FlowEvent::RoleOff {
                resource,
                resource_type: window.resource_type,
            },
        );
        if let Some(period) = window.period {
            sched.schedule(
                now.saturating_add(period.saturating_sub(window.duration)),
                Task::RoleOn { resource, entry },
            );
        }
        let Some(holder) = self.catalog.holder(resource) else {
            return;
        };
        if holder.as_type != window.resource_type || still_plays {
            return;
        }
        let interruptible = matches!(
            self.graph.get(holder.node).map(|f| &f.kind),
            Some(NodeKind::Activity(spec)) if spec.interruptible
        );
        if interruptible {
            self.interrupt(holder.thread, holder.node, sched);
        }
    }

    /// Suspends a running activity, keeping its remaining time for when it
    /// gets resources again.
    fn interrupt(&mut self, tid: ThreadId, node: NodeIndex, sched: &mut dyn Scheduler) {
        let now = sched.now();
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        let Some(finish_at) = thread
            .execution
            .filter(|e| e.node == node)
            .and_then(|e| e.finish_at)
        else {
            return;
        };
        let remaining = finish_at.saturating_sub(now);
        thread.generation += 1;
        thread.execution = None;
        thread.resume = Some(remaining);
        let entity = thread.entity;
        self.emit(
            now,
            FlowEvent::Interrupt {
                entity,
                thread: tid,
                node,
                remaining,
            },
        );

        let mut touched = BTreeSet::new();
        for Held { resource, .. } in self.take_held(SiteId::Activity(node), entity, tid) {
            self.catalog.free(resource);
            self.emit(
                now,
                FlowEvent::ResourceReleased {
                    entity,
                    node,
                    resource,
                },
            );
            touched.extend(self.managers.for_resource(&self.catalog, resource));
        }
        if let Some(manager) = self.managers.for_node(node) {
            let priority = self.graph.get(node).map_or(0, |f| f.priority);
            self.enqueue(manager, node, priority, tid, entity, now);
            touched.insert(manager);
        }
        for manager in touched {
            self.retry(manager, sched);
        }
    }
}
