use std::collections::{BTreeSet, VecDeque};

use crate::actions::Condition;
use crate::error::{FlowError, FlowResult};
use crate::nodes::{Branch, Flow, MergeKind, NodeIndex, NodeKind, SplitKind};

/// Arena of flows addressed by `NodeIndex`.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<Flow>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flow: Flow) -> NodeIndex {
        self.nodes.push(flow);
        self.nodes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: NodeIndex) -> Option<&Flow> {
        self.nodes.get(index)
    }

    pub fn node(&self, index: NodeIndex) -> FlowResult<&Flow> {
        self.nodes.get(index).ok_or(FlowError::UnknownNode(index))
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> FlowResult<&mut Flow> {
        self.nodes.get_mut(index).ok_or(FlowError::UnknownNode(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &Flow)> {
        self.nodes.iter().enumerate()
    }

    pub fn find(&self, id: &str) -> Option<NodeIndex> {
        self.nodes.iter().position(|f| f.id == id)
    }

    pub fn link(&mut self, from: NodeIndex, to: NodeIndex) -> FlowResult<()> {
        self.link_branch(from, Branch::new(to))
    }

    pub fn link_guarded(&mut self, from: NodeIndex, to: NodeIndex, guard: Condition) -> FlowResult<()> {
        match &self.node(from)?.kind {
            NodeKind::Split(spec) if spec.kind.uses_guards() => {}
            _ => {
                return Err(FlowError::InvalidLink {
                    from,
                    to,
                    reason: "guarded links start at an exclusive or multi choice".to_string(),
                });
            }
        }
        self.link_branch(from, Branch { guard, ..Branch::new(to) })
    }

    pub fn link_weighted(&mut self, from: NodeIndex, to: NodeIndex, weight: f64) -> FlowResult<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(FlowError::InvalidLink {
                from,
                to,
                reason: format!("weight {} must be finite and non-negative", weight),
            });
        }
        match &self.node(from)?.kind {
            NodeKind::Split(spec) if spec.kind == SplitKind::ProbabilitySelection => {}
            _ => {
                return Err(FlowError::InvalidLink {
                    from,
                    to,
                    reason: "weighted links start at a probability selection".to_string(),
                });
            }
        }
        self.link_branch(from, Branch { weight, ..Branch::new(to) })
    }

    fn link_branch(&mut self, from: NodeIndex, branch: Branch) -> FlowResult<()> {
        let to = branch.target;
        self.node(to)?;
        let source = self.node_mut(from)?;
        match &mut source.kind {
            NodeKind::Split(spec) => spec.branches.push(branch),
            _ => {
                if source.next.is_some() {
                    return Err(FlowError::InvalidLink {
                        from,
                        to,
                        reason: "node already has a successor".to_string(),
                    });
                }
                source.next = Some(to);
            }
        }
        if let NodeKind::Merge(spec) = &mut self.node_mut(to)?.kind {
            if !matches!(spec.kind, MergeKind::Thread { .. }) {
                spec.incoming += 1;
            }
        }
        Ok(())
    }

    /// Records, for every generalized merge, the predecessors the merge can
    /// reach itself. Arrivals over those edges open rounds of their own.
    pub fn mark_back_edges(&mut self) {
        let merges: Vec<NodeIndex> = self
            .iter()
            .filter(|(_, f)| matches!(&f.kind, NodeKind::Merge(spec) if spec.is_generalized()))
            .map(|(i, _)| i)
            .collect();
        for merge in merges {
            let reachable = self.reachable_from(merge);
            let back: Vec<NodeIndex> = self
                .iter()
                .filter(|(i, f)| reachable.contains(i) && f.successors().contains(&merge))
                .map(|(i, _)| i)
                .collect();
            if let Some(NodeKind::Merge(spec)) = self.nodes.get_mut(merge).map(|f| &mut f.kind) {
                spec.back_edges = back;
            }
        }
    }

    fn reachable_from(&self, start: NodeIndex) -> BTreeSet<NodeIndex> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeIndex> = self
            .get(start)
            .map(|f| f.successors())
            .unwrap_or_default()
            .into();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current) {
                if let Some(flow) = self.get(current) {
                    queue.extend(flow.successors());
                }
            }
        }
        seen
    }

    /// Marks every node reachable from an inner entry as owned by the node
    /// that drives it, and checks each inner graph has exactly one exit.
    pub fn assign_owners(&mut self) -> Vec<FlowError> {
        let mut errors = Vec::new();
        for node in &mut self.nodes {
            node.owner = None;
        }
        let wrappers: Vec<(NodeIndex, Vec<NodeIndex>)> = self
            .iter()
            .map(|(i, f)| (i, f.inner_entries()))
            .filter(|(_, entries)| !entries.is_empty())
            .collect();

        for (wrapper, entries) in wrappers {
            for entry in entries {
                if self.get(entry).is_none() {
                    errors.push(FlowError::UnknownNode(entry));
                    continue;
                }
                let mut seen = BTreeSet::new();
                let mut queue = VecDeque::from([entry]);
                let mut exits = Vec::new();
                while let Some(current) = queue.pop_front() {
                    if current == wrapper || !seen.insert(current) {
                        continue;
                    }
                    let flow = &mut self.nodes[current];
                    match flow.owner {
                        Some(other) if other != wrapper => {
                            errors.push(FlowError::configuration(
                                current,
                                format!("node is shared by the inner graphs of {} and {}", other, wrapper),
                            ));
                            continue;
                        }
                        _ => flow.owner = Some(wrapper),
                    }
                    let successors = flow.successors();
                    if successors.is_empty() {
                        exits.push(current);
                    }
                    queue.extend(successors);
                }
                if exits.len() != 1 {
                    errors.push(FlowError::configuration(
                        wrapper,
                        format!("inner graph starting at {} has {} exits, expected 1", entry, exits.len()),
                    ));
                }
            }
        }
        errors
    }
}
