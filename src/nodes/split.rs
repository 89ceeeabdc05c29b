use crate::actions::Condition;
use crate::nodes::NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    /// Every branch receives a copy of the parent's executability.
    Parallel,
    /// The first branch whose guard holds is taken; the rest are skipped.
    ExclusiveChoice,
    /// Every branch whose guard holds is taken.
    MultiChoice,
    /// Exactly one branch, drawn by weight.
    ProbabilitySelection,
    /// `copies` executable threads per branch.
    Thread { copies: usize },
}

impl SplitKind {
    pub fn uses_guards(&self) -> bool {
        matches!(self, SplitKind::ExclusiveChoice | SplitKind::MultiChoice)
    }
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub target: NodeIndex,
    pub guard: Condition,
    pub weight: f64,
}

impl Branch {
    pub fn new(target: NodeIndex) -> Self {
        Self {
            target,
            guard: Condition::always(),
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitSpec {
    pub kind: SplitKind,
    pub branches: Vec<Branch>,
}

impl SplitSpec {
    pub fn new(kind: SplitKind) -> Self {
        Self {
            kind,
            branches: Vec::new(),
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.branches
            .iter()
            .map(|b| b.weight)
            .filter(|w| *w > 0.0)
            .sum()
    }
}
