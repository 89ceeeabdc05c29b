use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::nodes::{NodeIndex, SiteId};
use crate::resources::{ResourceId, ResourceTypeId};
use crate::runtime::Timestamp;
use crate::runtime::context::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ThreadId(pub u64);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held {
    pub resource: ResourceId,
    pub as_type: ResourceTypeId,
}

/// A resource-consuming node currently running on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub node: NodeIndex,
    /// `None` while an inner graph drives the node.
    pub finish_at: Option<Timestamp>,
}

/// A token moving through the graph on behalf of an entity.
#[derive(Debug, Clone)]
pub struct WorkThread {
    pub id: ThreadId,
    pub entity: EntityId,
    pub parent: Option<ThreadId>,
    /// Wrapper thread waiting for this thread's inner graph to exit.
    pub scope: Option<ThreadId>,
    pub executable: bool,
    /// Nodes seen while not executable; a repeat visit ends the thread.
    pub path: Vec<NodeIndex>,
    pub last_node: Option<NodeIndex>,
    pub held: BTreeMap<SiteId, Vec<Held>>,
    pub execution: Option<Execution>,
    /// Time left on an interrupted activity.
    pub resume: Option<u64>,
    /// Bumped on interrupt so the old finish event is ignored.
    pub generation: u64,
    children: usize,
    ended: bool,
}

impl WorkThread {
    pub fn was_visited(&self, node: NodeIndex) -> bool {
        !self.executable && self.path.contains(&node)
    }

    pub fn visit(&mut self, node: NodeIndex) {
        if !self.executable {
            self.path.push(node);
        }
    }

    /// Turns the thread into a false token starting at `node`.
    pub fn cancel(&mut self, node: NodeIndex) {
        self.executable = false;
        self.path.push(node);
    }
}

/// Threads released by `ThreadArena::end`.
#[derive(Debug, Default)]
pub struct Reclaimed {
    pub threads: Vec<WorkThread>,
    /// Entities whose last thread was reclaimed.
    pub finished: Vec<EntityId>,
}

/// Owner of all live threads.
///
/// A thread stays in the arena until it has ended and all of its children
/// have been reclaimed; reclaiming a thread may cascade to its parent.
#[derive(Debug, Default)]
pub struct ThreadArena {
    threads: HashMap<ThreadId, WorkThread>,
    live: HashMap<EntityId, usize>,
    next: u64,
}

impl ThreadArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &mut self,
        entity: EntityId,
        parent: Option<ThreadId>,
        scope: Option<ThreadId>,
        executable: bool,
        path: Vec<NodeIndex>,
    ) -> ThreadId {
        self.next += 1;
        let id = ThreadId(self.next);
        if let Some(p) = parent.and_then(|p| self.threads.get_mut(&p)) {
            p.children += 1;
        }
        *self.live.entry(entity).or_default() += 1;
        self.threads.insert(
            id,
            WorkThread {
                id,
                entity,
                parent,
                scope,
                executable,
                path,
                last_node: None,
                held: BTreeMap::new(),
                execution: None,
                resume: None,
                generation: 0,
                children: 0,
                ended: false,
            },
        );
        id
    }

    pub fn spawn_root(&mut self, entity: EntityId) -> ThreadId {
        self.insert(entity, None, None, true, Vec::new())
    }

    /// Branch of a split: inherits the parent's scope and visited path.
    pub fn spawn_child(&mut self, parent: ThreadId, executable: bool) -> Option<ThreadId> {
        let p = self.threads.get(&parent)?;
        let (entity, scope, path) = (p.entity, p.scope, p.path.clone());
        let executable = executable && p.executable;
        Some(self.insert(entity, Some(parent), scope, executable, path))
    }

    /// First thread of an inner graph driven by `wrapper`.
    pub fn spawn_scoped(&mut self, wrapper: ThreadId) -> Option<ThreadId> {
        let w = self.threads.get(&wrapper)?;
        let entity = w.entity;
        Some(self.insert(entity, Some(wrapper), Some(wrapper), true, Vec::new()))
    }

    /// Continuation leaving a merge: takes the place of `of` in the tree.
    pub fn spawn_sibling(&mut self, of: ThreadId, executable: bool, path: Vec<NodeIndex>) -> Option<ThreadId> {
        let t = self.threads.get(&of)?;
        let (entity, parent, scope) = (t.entity, t.parent, t.scope);
        Some(self.insert(entity, parent, scope, executable, path))
    }

    pub fn get(&self, id: ThreadId) -> Option<&WorkThread> {
        self.threads.get(&id)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut WorkThread> {
        self.threads.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn live_threads(&self, entity: EntityId) -> usize {
        self.live.get(&entity).copied().unwrap_or(0)
    }

    /// Marks `id` ended and reclaims whatever no longer has a reason to exist.
    pub fn end(&mut self, id: ThreadId) -> Reclaimed {
        let mut out = Reclaimed::default();
        match self.threads.get_mut(&id) {
            Some(t) => t.ended = true,
            None => return out,
        }
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let reclaimable = self
                .threads
                .get(&current)
                .is_some_and(|t| t.ended && t.children == 0);
            if !reclaimable {
                break;
            }
            let Some(thread) = self.threads.remove(&current) else {
                break;
            };
            if let Some(count) = self.live.get_mut(&thread.entity) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.live.remove(&thread.entity);
                    out.finished.push(thread.entity);
                }
            }
            cursor = thread.parent;
            if let Some(p) = cursor.and_then(|p| self.threads.get_mut(&p)) {
                p.children = p.children.saturating_sub(1);
            }
            out.threads.push(thread);
        }
        out
    }
}
