use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::nodes::{MergeKind, MergeSpec, NodeIndex};
use crate::runtime::Timestamp;
use crate::runtime::context::EntityId;

/// A thread to spawn after a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub executable: bool,
    pub path: Vec<NodeIndex>,
}

impl Continuation {
    fn pass() -> Self {
        Self {
            executable: true,
            path: Vec::new(),
        }
    }

    fn skip(mut path: Vec<NodeIndex>, node: NodeIndex) -> Self {
        path.push(node);
        Self {
            executable: false,
            path,
        }
    }
}

fn union_path(into: &mut Vec<NodeIndex>, from: &[NodeIndex]) {
    for n in from {
        if !into.contains(n) {
            into.push(*n);
        }
    }
}

#[derive(Debug, Default)]
struct CountingState {
    checked: usize,
    true_checked: usize,
    activated: bool,
    passed_at: Option<Timestamp>,
    false_path: Vec<NodeIndex>,
}

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    executable: bool,
    path: Vec<NodeIndex>,
}

/// Arrivals buffered per incoming edge. A round is the front of every queue
/// on the side (forward or back edges) that opened it.
#[derive(Debug, Default)]
struct BufferedState {
    slots: BTreeMap<NodeIndex, VecDeque<Pending>>,
    round: Option<bool>,
    activated: bool,
    seq: u64,
}

impl BufferedState {
    fn push(&mut self, edge: NodeIndex, executable: bool, path: &[NodeIndex]) {
        self.seq += 1;
        self.slots.entry(edge).or_default().push_back(Pending {
            seq: self.seq,
            executable,
            path: path.to_vec(),
        });
    }

    /// Side of the oldest buffered arrival.
    fn oldest_side(&self, spec: &MergeSpec) -> Option<bool> {
        self.slots
            .iter()
            .filter_map(|(edge, q)| q.front().map(|p| (p.seq, spec.is_back_edge(*edge))))
            .min()
            .map(|(_, back)| back)
    }

    fn fronts(&self, spec: &MergeSpec, back: bool) -> impl Iterator<Item = &Pending> {
        self.slots
            .iter()
            .filter(move |(edge, _)| spec.is_back_edge(**edge) == back)
            .filter_map(|(_, q)| q.front())
    }

    fn false_path(&self, spec: &MergeSpec, back: bool) -> Vec<NodeIndex> {
        let mut path = Vec::new();
        for pending in self.fronts(spec, back).filter(|p| !p.executable) {
            union_path(&mut path, &pending.path);
        }
        path
    }

    /// Drops the current round, keeping later arrivals queued.
    fn next_round(&mut self, spec: &MergeSpec, back: bool) {
        for (edge, q) in self.slots.iter_mut() {
            if spec.is_back_edge(*edge) == back {
                q.pop_front();
            }
        }
        self.slots.retain(|_, q| !q.is_empty());
        self.round = None;
        self.activated = false;
    }

    fn pending(&self) -> usize {
        self.slots.values().map(VecDeque::len).sum()
    }
}

/// Join bookkeeping keyed by merge node and entity.
#[derive(Debug, Default)]
pub struct MergeControl {
    counting: HashMap<(NodeIndex, EntityId), CountingState>,
    buffered: HashMap<(NodeIndex, EntityId), BufferedState>,
}

impl MergeControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an arrival at `node` over `edge` and returns the threads that
    /// leave the merge because of it. The arriving thread always ends.
    #[allow(clippy::too_many_arguments)]
    pub fn arrive(
        &mut self,
        node: NodeIndex,
        spec: &MergeSpec,
        entity: EntityId,
        edge: Option<NodeIndex>,
        executable: bool,
        path: &[NodeIndex],
        now: Timestamp,
    ) -> Vec<Continuation> {
        match spec.kind {
            MergeKind::Multi => {
                if executable {
                    vec![Continuation::pass()]
                } else {
                    Vec::new()
                }
            }
            MergeKind::GeneralizedAnd | MergeKind::GeneralizedOr => {
                self.arrive_buffered(node, spec, entity, edge.unwrap_or(node), executable, path)
            }
            _ => self.arrive_counting(node, spec, entity, executable, path, now),
        }
    }

    fn arrive_counting(
        &mut self,
        node: NodeIndex,
        spec: &MergeSpec,
        entity: EntityId,
        executable: bool,
        path: &[NodeIndex],
        now: Timestamp,
    ) -> Vec<Continuation> {
        let expected = spec.expected_arrivals();
        let accept = spec.accept_value(expected);
        let key = (node, entity);
        let state = self.counting.entry(key).or_default();
        let mut out = Vec::new();

        state.checked += 1;
        if executable {
            state.true_checked += 1;
        } else {
            union_path(&mut state.false_path, path);
        }

        let pass = match spec.kind {
            MergeKind::Simple => executable && state.passed_at != Some(now),
            _ => executable && !state.activated && state.true_checked == accept,
        };
        if pass {
            state.activated = true;
            state.passed_at = Some(now);
            out.push(Continuation::pass());
        }

        if state.checked >= expected {
            if !state.activated {
                out.push(Continuation::skip(std::mem::take(&mut state.false_path), node));
            }
            self.counting.remove(&key);
        }
        out
    }

    fn arrive_buffered(
        &mut self,
        node: NodeIndex,
        spec: &MergeSpec,
        entity: EntityId,
        edge: NodeIndex,
        executable: bool,
        path: &[NodeIndex],
    ) -> Vec<Continuation> {
        let key = (node, entity);
        let state = self.buffered.entry(key).or_default();
        state.push(edge, executable, path);

        let mut out = Vec::new();
        while let Some(back) = state.round.or_else(|| state.oldest_side(spec)) {
            state.round = Some(back);
            let checked = state.fronts(spec, back).count();
            let true_checked = state.fronts(spec, back).filter(|p| p.executable).count();
            // Edges seen at runtime but never linked widen the round.
            let expected = spec.round_width(back).max(checked).max(1);
            let accept = match spec.kind {
                MergeKind::GeneralizedOr => spec.accept.unwrap_or(1).clamp(1, expected),
                _ => spec.accept_value(expected),
            };
            if !state.activated && true_checked >= accept {
                state.activated = true;
                out.push(Continuation::pass());
            }
            if checked < expected {
                break;
            }
            if !state.activated {
                out.push(Continuation::skip(state.false_path(spec, back), node));
            }
            state.next_round(spec, back);
        }
        if state.slots.is_empty() {
            self.buffered.remove(&key);
        }
        out
    }

    /// Drops every pending round belonging to `entity`, returning the merges
    /// that still held buffered arrivals and how many.
    pub fn forget(&mut self, entity: EntityId) -> Vec<(NodeIndex, usize)> {
        self.counting.retain(|(_, e), _| *e != entity);
        let mut stranded = Vec::new();
        self.buffered.retain(|(node, e), state| {
            if *e != entity {
                return true;
            }
            stranded.push((*node, state.pending()));
            false
        });
        stranded.sort_unstable();
        stranded
    }

    pub fn pending(&self) -> usize {
        self.counting.len() + self.buffered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E: EntityId = EntityId(1);

    fn spec(kind: MergeKind, incoming: usize) -> MergeSpec {
        let mut s = MergeSpec::new(kind);
        s.incoming = incoming;
        s
    }

    #[test]
    fn synchronization_waits_for_all() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::Synchronization, 3);
        assert!(mc.arrive(9, &s, E, Some(1), true, &[], 0).is_empty());
        assert!(mc.arrive(9, &s, E, Some(2), true, &[], 1).is_empty());
        assert_eq!(mc.arrive(9, &s, E, Some(3), true, &[], 2), vec![Continuation::pass()]);
        assert_eq!(mc.pending(), 0);
    }

    #[test]
    fn all_false_round_emits_false_token() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::Synchronization, 2);
        mc.arrive(9, &s, E, Some(1), false, &[1], 0);
        let out = mc.arrive(9, &s, E, Some(2), false, &[2], 0);
        assert_eq!(out, vec![Continuation { executable: false, path: vec![1, 2, 9] }]);
    }

    #[test]
    fn synchronization_with_accept_passes_early_once() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::Synchronization, 3).with_accept(1);
        assert_eq!(mc.arrive(9, &s, E, Some(1), true, &[], 0).len(), 1);
        assert!(mc.arrive(9, &s, E, Some(2), true, &[], 0).is_empty());
        assert!(mc.arrive(9, &s, E, Some(3), true, &[], 0).is_empty());
        assert_eq!(mc.pending(), 0);
    }

    #[test]
    fn simple_merge_passes_once_per_instant() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::Simple, 3);
        assert_eq!(mc.arrive(9, &s, E, Some(1), true, &[], 4).len(), 1);
        assert!(mc.arrive(9, &s, E, Some(2), true, &[], 4).is_empty());
        assert_eq!(mc.arrive(9, &s, E, Some(3), true, &[], 5).len(), 1);
    }

    #[test]
    fn multi_merge_absorbs_false_tokens() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::Multi, 2);
        assert_eq!(mc.arrive(9, &s, E, Some(1), true, &[], 0).len(), 1);
        assert!(mc.arrive(9, &s, E, Some(2), false, &[2], 0).is_empty());
        assert_eq!(mc.arrive(9, &s, E, Some(1), true, &[], 0).len(), 1);
    }

    #[test]
    fn generalized_and_keeps_leftover_rounds() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::GeneralizedAnd, 2);
        // Edge 1 fires twice before edge 2 fires once.
        assert!(mc.arrive(9, &s, E, Some(1), true, &[], 0).is_empty());
        assert!(mc.arrive(9, &s, E, Some(1), true, &[], 1).is_empty());
        assert_eq!(mc.arrive(9, &s, E, Some(2), true, &[], 2).len(), 1);
        assert_eq!(mc.pending(), 1);
        assert_eq!(mc.arrive(9, &s, E, Some(2), true, &[], 3).len(), 1);
        assert_eq!(mc.pending(), 0);
    }

    #[test]
    fn generalized_or_passes_once_per_round() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::GeneralizedOr, 2);
        assert!(mc.arrive(9, &s, E, Some(1), false, &[1], 0).is_empty());
        assert_eq!(mc.arrive(9, &s, E, Some(2), true, &[], 0), vec![Continuation::pass()]);

        // An early executable arrival passes without waiting for the other edge.
        assert_eq!(mc.arrive(9, &s, E, Some(2), true, &[], 1), vec![Continuation::pass()]);
        assert!(mc.arrive(9, &s, E, Some(1), true, &[], 2).is_empty());
        assert_eq!(mc.pending(), 0);
    }

    #[test]
    fn back_edge_arrivals_open_their_own_round() {
        let mut mc = MergeControl::new();
        let mut s = spec(MergeKind::GeneralizedOr, 2);
        s.back_edges = vec![5];
        assert_eq!(mc.arrive(9, &s, E, Some(1), true, &[], 0).len(), 1);
        assert_eq!(mc.pending(), 0);
        assert_eq!(mc.arrive(9, &s, E, Some(5), true, &[], 1).len(), 1);
        assert_eq!(mc.arrive(9, &s, E, Some(5), true, &[], 2).len(), 1);
        let out = mc.arrive(9, &s, E, Some(5), false, &[5], 3);
        assert_eq!(out, vec![Continuation { executable: false, path: vec![5, 9] }]);
        assert_eq!(mc.pending(), 0);
    }

    #[test]
    fn forget_reports_stranded_arrivals() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::GeneralizedAnd, 2);
        mc.arrive(9, &s, E, Some(1), true, &[], 0);
        mc.arrive(9, &s, E, Some(1), true, &[], 0);
        assert_eq!(mc.forget(E), vec![(9, 2)]);
        assert_eq!(mc.pending(), 0);
        assert!(mc.forget(E).is_empty());
    }

    #[test]
    fn thread_merge_counts_copies() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::Thread { threads: 2 }, 0);
        assert!(mc.arrive(9, &s, E, Some(1), true, &[], 0).is_empty());
        assert_eq!(mc.arrive(9, &s, E, Some(1), true, &[], 0).len(), 1);
    }

    #[test]
    fn entities_do_not_share_rounds() {
        let mut mc = MergeControl::new();
        let s = spec(MergeKind::Synchronization, 2);
        assert!(mc.arrive(9, &s, EntityId(1), Some(1), true, &[], 0).is_empty());
        assert!(mc.arrive(9, &s, EntityId(2), Some(2), true, &[], 0).is_empty());
        assert_eq!(mc.pending(), 2);
    }
}
