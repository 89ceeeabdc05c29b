use crate::actions::{Condition, Expression};
use crate::nodes::NodeIndex;

/// How often a structured node runs its inner graph.
#[derive(Debug, Clone)]
pub enum LoopControl {
    Once,
    /// Count evaluated once on entry.
    For(Expression),
    /// Checked before each iteration.
    WhileDo(Condition),
    /// Checked after each iteration.
    DoWhile(Condition),
}

#[derive(Debug, Clone)]
pub struct StructuredSpec {
    pub entry: NodeIndex,
    pub control: LoopControl,
}

#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub iteration: u64,
    pub remaining: u64,
}
