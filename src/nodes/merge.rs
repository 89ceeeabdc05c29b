use crate::nodes::NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// First executable arrival per timestamp passes.
    Simple,
    /// Waits for every incoming edge; passes once `accept` of them are executable.
    Synchronization,
    /// Every executable arrival passes.
    Multi,
    /// Per-edge buffering, passes once `accept` buffered arrivals are executable.
    GeneralizedAnd,
    /// Per-edge buffering, passes once `accept` (default one) of the buffered
    /// edges are executable.
    GeneralizedOr,
    /// Joins `threads` copies coming from a thread split.
    Thread { threads: usize },
}

#[derive(Debug, Clone)]
pub struct MergeSpec {
    pub kind: MergeKind,
    /// Number of linked predecessors, maintained by `FlowGraph::link`.
    pub incoming: usize,
    pub accept: Option<usize>,
    /// Predecessors reachable from the merge itself, set by
    /// `FlowGraph::mark_back_edges` for generalized merges.
    pub back_edges: Vec<NodeIndex>,
}

impl MergeSpec {
    pub fn new(kind: MergeKind) -> Self {
        Self {
            kind,
            incoming: 0,
            accept: None,
            back_edges: Vec::new(),
        }
    }

    pub fn with_accept(mut self, accept: usize) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn is_generalized(&self) -> bool {
        matches!(self.kind, MergeKind::GeneralizedAnd | MergeKind::GeneralizedOr)
    }

    pub fn is_back_edge(&self, edge: NodeIndex) -> bool {
        self.back_edges.contains(&edge)
    }

    /// Distinct edges a generalized round waits for, by the kind of edge
    /// that opened it.
    pub fn round_width(&self, back: bool) -> usize {
        if back {
            self.back_edges.len()
        } else {
            self.incoming.saturating_sub(self.back_edges.len())
        }
    }

    /// Arrivals that make up one round.
    pub fn expected_arrivals(&self) -> usize {
        match self.kind {
            MergeKind::Thread { threads } => threads.max(1),
            _ => self.incoming.max(1),
        }
    }

    pub fn accept_value(&self, expected: usize) -> usize {
        self.accept.unwrap_or(expected).clamp(1, expected.max(1))
    }
}
