use std::collections::BTreeMap;

use serde::Serialize;

use crate::nodes::NodeIndex;
use crate::resources::ResourceTypeId;
use crate::resources::work_group::WorkGroup;

/// Where acquired resources are parked until released.
///
/// `Named` sites belong to the entity so a later release node on another
/// thread can find them; `Activity` sites belong to the executing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SiteId {
    Named(u32),
    Activity(NodeIndex),
}

pub type Cancellations = BTreeMap<ResourceTypeId, u64>;

#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub site: u32,
    pub work_groups: Vec<WorkGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseSpec {
    pub site: u32,
    pub cancellations: Cancellations,
}

#[derive(Debug, Clone, Default)]
pub struct ActivitySpec {
    pub work_groups: Vec<WorkGroup>,
    pub cancellations: Cancellations,
    pub interruptible: bool,
}
