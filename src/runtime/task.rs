use std::collections::HashMap;

use serde_json::Value;

use crate::nodes::NodeIndex;
use crate::resources::ResourceId;
use crate::runtime::thread::ThreadId;

/// A unit of work on the event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// A new entity enters at `root` with its initial variables.
    Arrival {
        root: NodeIndex,
        vars: HashMap<String, Value>,
    },
    /// A thread reaches `node`.
    Request { thread: ThreadId, node: NodeIndex },
    /// A timed node completes. Stale when `generation` no longer matches the thread.
    Finish {
        thread: ThreadId,
        node: NodeIndex,
        generation: u64,
    },
    CancellationEnd { resource: ResourceId },
    /// Timetable entry `entry` of `resource` opens.
    RoleOn { resource: ResourceId, entry: usize },
    RoleOff { resource: ResourceId, entry: usize },
}
