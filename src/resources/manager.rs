use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::nodes::{FlowGraph, NodeIndex};
use crate::resources::{ResourceCatalog, ResourceId, ResourceTypeId};
use crate::runtime::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagerId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedRequest {
    pub thread: ThreadId,
    pub node: NodeIndex,
}

/// Ordering key: node priority first, then arrival order.
pub type QueueKey = (i32, u64);

/// Waiting requests for one group of nodes that compete for the same resources.
#[derive(Debug, Default)]
pub struct ActivityManager {
    types: BTreeSet<ResourceTypeId>,
    queue: BTreeMap<QueueKey, QueuedRequest>,
    feasible: HashMap<NodeIndex, bool>,
    seq: u64,
}

impl ActivityManager {
    pub fn types(&self) -> &BTreeSet<ResourceTypeId> {
        &self.types
    }

    pub fn enqueue(&mut self, thread: ThreadId, node: NodeIndex, priority: i32) -> QueueKey {
        self.seq += 1;
        let key = (priority, self.seq);
        self.queue.insert(key, QueuedRequest { thread, node });
        key
    }

    pub fn remove(&mut self, key: &QueueKey) -> Option<QueuedRequest> {
        self.queue.remove(key)
    }

    pub fn queued(&self) -> Vec<(QueueKey, QueuedRequest)> {
        self.queue.iter().map(|(k, q)| (*k, *q)).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_feasible(&self, node: NodeIndex) -> bool {
        self.feasible.get(&node).copied().unwrap_or(true)
    }

    pub fn set_infeasible(&mut self, node: NodeIndex) {
        self.feasible.insert(node, false);
    }

    /// Resources changed: every node may be satisfiable again.
    pub fn rearm(&mut self) {
        for flag in self.feasible.values_mut() {
            *flag = true;
        }
    }
}

/// Partition of resource-consuming nodes and resource types into
/// independent managers.
///
/// Two elements share a manager when a node requests a type, or when one
/// resource can play both types.
#[derive(Debug, Default)]
pub struct ManagerSet {
    managers: Vec<ActivityManager>,
    by_node: HashMap<NodeIndex, ManagerId>,
    by_type: HashMap<ResourceTypeId, ManagerId>,
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

impl ManagerSet {
    pub fn build(graph: &FlowGraph, catalog: &ResourceCatalog) -> Self {
        let node_count = graph.len();
        let type_slot = |t: ResourceTypeId| node_count + t.0;
        let mut sets = DisjointSet::new(node_count + catalog.type_count());

        for (index, flow) in graph.iter() {
            if let Some(groups) = flow.kind.work_groups() {
                for t in groups.iter().flat_map(|g| g.types()) {
                    sets.union(index, type_slot(t));
                }
            }
        }
        for (_, resource) in catalog.resources() {
            let mut types = resource.types();
            if let Some(first) = types.next() {
                for other in types {
                    sets.union(type_slot(first), type_slot(other));
                }
            }
        }

        let mut set = ManagerSet::default();
        let mut by_root: BTreeMap<usize, ManagerId> = BTreeMap::new();
        for (index, flow) in graph.iter() {
            if !flow.kind.acquires_resources() {
                continue;
            }
            let root = sets.find(index);
            let id = *by_root.entry(root).or_insert_with(|| {
                set.managers.push(ActivityManager::default());
                ManagerId(set.managers.len() - 1)
            });
            set.by_node.insert(index, id);
        }
        for t in 0..catalog.type_count() {
            let t = ResourceTypeId(t);
            if let Some(id) = by_root.get(&sets.find(type_slot(t))) {
                set.managers[id.0].types.insert(t);
                set.by_type.insert(t, *id);
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub fn get(&self, id: ManagerId) -> Option<&ActivityManager> {
        self.managers.get(id.0)
    }

    pub fn get_mut(&mut self, id: ManagerId) -> Option<&mut ActivityManager> {
        self.managers.get_mut(id.0)
    }

    pub fn for_node(&self, node: NodeIndex) -> Option<ManagerId> {
        self.by_node.get(&node).copied()
    }

    pub fn for_type(&self, t: ResourceTypeId) -> Option<ManagerId> {
        self.by_type.get(&t).copied()
    }

    /// Managers that care about `resource` becoming available.
    pub fn for_resource(&self, catalog: &ResourceCatalog, resource: ResourceId) -> BTreeSet<ManagerId> {
        catalog
            .resource(resource)
            .map(|r| r.types().filter_map(|t| self.for_type(t)).collect())
            .unwrap_or_default()
    }

    pub fn waiting(&self) -> usize {
        self.managers.iter().map(ActivityManager::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{ActivitySpec, Flow, NodeKind};
    use crate::resources::work_group::WorkGroup;

    fn activity(types: &[ResourceTypeId]) -> NodeKind {
        NodeKind::Activity(ActivitySpec {
            work_groups: vec![WorkGroup::new(0, types.iter().map(|t| (*t, 1)).collect())],
            ..Default::default()
        })
    }

    #[test]
    fn shared_resource_joins_types() {
        let mut cat = ResourceCatalog::new();
        let a = cat.add_type("a");
        let b = cat.add_type("b");
        let c = cat.add_type("c");
        cat.add_resource("ab", &[a, b]).unwrap();
        cat.add_resource("c", &[c]).unwrap();

        let mut g = FlowGraph::new();
        let na = g.push(Flow::new("na", activity(&[a])));
        let nb = g.push(Flow::new("nb", activity(&[b])));
        let nc = g.push(Flow::new("nc", activity(&[c])));
        g.push(Flow::new("plain", NodeKind::Pass));

        let set = ManagerSet::build(&g, &cat);
        assert_eq!(set.len(), 2);
        assert_eq!(set.for_node(na), set.for_node(nb));
        assert_ne!(set.for_node(na), set.for_node(nc));
        assert_eq!(set.for_type(c), set.for_node(nc));
        assert_eq!(set.for_node(3), None);
    }

    #[test]
    fn queue_orders_by_priority_then_arrival() {
        let mut m = ActivityManager::default();
        m.enqueue(ThreadId(1), 0, 5);
        m.enqueue(ThreadId(2), 0, 1);
        m.enqueue(ThreadId(3), 0, 1);
        let order: Vec<ThreadId> = m.queued().into_iter().map(|(_, q)| q.thread).collect();
        assert_eq!(order, vec![ThreadId(2), ThreadId(3), ThreadId(1)]);
    }

    #[test]
    fn rearm_restores_feasibility() {
        let mut m = ActivityManager::default();
        m.set_infeasible(4);
        assert!(!m.is_feasible(4));
        m.rearm();
        assert!(m.is_feasible(4));
    }
}
