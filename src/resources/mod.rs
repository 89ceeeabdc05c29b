pub mod manager;
pub mod work_group;

use serde::Serialize;

use crate::error::{FlowError, FlowResult};
use crate::nodes::NodeIndex;
use crate::runtime::Timestamp;
use crate::runtime::context::EntityId;
use crate::runtime::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceTypeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceId(pub usize);

/// A window in which a resource may play `resource_type`.
///
/// Without a period the window opens once.
#[derive(Debug, Clone, PartialEq)]
pub struct TimetableEntry {
    pub resource_type: ResourceTypeId,
    pub start: Timestamp,
    pub duration: u64,
    pub period: Option<u64>,
}

impl TimetableEntry {
    pub fn is_active(&self, now: Timestamp) -> bool {
        if now < self.start {
            return false;
        }
        let offset = now - self.start;
        match self.period {
            Some(period) if period > 0 => offset % period < self.duration,
            _ => offset < self.duration,
        }
    }
}

/// Who holds a resource and in which role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    pub entity: EntityId,
    pub thread: ThreadId,
    pub node: NodeIndex,
    pub as_type: ResourceTypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Available,
    Held(Holder),
    Cancelled { until: Timestamp },
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub roles: Vec<ResourceTypeId>,
    pub timetable: Vec<TimetableEntry>,
    pub state: ResourceState,
}

impl Resource {
    /// Whether the resource may act as `rtype` at `now`, regardless of state.
    pub fn plays(&self, rtype: ResourceTypeId, now: Timestamp) -> bool {
        self.roles.contains(&rtype)
            || self
                .timetable
                .iter()
                .any(|e| e.resource_type == rtype && e.is_active(now))
    }

    pub fn types(&self) -> impl Iterator<Item = ResourceTypeId> + '_ {
        self.roles
            .iter()
            .copied()
            .chain(self.timetable.iter().map(|e| e.resource_type))
    }

    pub fn is_available_as(&self, rtype: ResourceTypeId, now: Timestamp) -> bool {
        self.state == ResourceState::Available && self.plays(rtype, now)
    }
}

/// All resource types and resources of a model.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    types: Vec<String>,
    resources: Vec<Resource>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, name: &str) -> ResourceTypeId {
        if let Some(id) = self.type_id(name) {
            return id;
        }
        self.types.push(name.to_string());
        ResourceTypeId(self.types.len() - 1)
    }

    pub fn type_id(&self, name: &str) -> Option<ResourceTypeId> {
        self.types.iter().position(|t| t == name).map(ResourceTypeId)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn add_resource(&mut self, name: &str, roles: &[ResourceTypeId]) -> FlowResult<ResourceId> {
        for role in roles {
            self.check_type(*role)?;
        }
        self.resources.push(Resource {
            name: name.to_string(),
            roles: roles.to_vec(),
            timetable: Vec::new(),
            state: ResourceState::Available,
        });
        Ok(ResourceId(self.resources.len() - 1))
    }

    pub fn add_timetable_entry(&mut self, resource: ResourceId, entry: TimetableEntry) -> FlowResult<()> {
        self.check_type(entry.resource_type)?;
        if let Some(period) = entry.period {
            if period <= entry.duration {
                return Err(FlowError::Timetable {
                    resource: resource.0.to_string(),
                    message: format!("period {} must exceed duration {}", period, entry.duration),
                });
            }
        }
        let res = self
            .resources
            .get_mut(resource.0)
            .ok_or_else(|| FlowError::UnknownResource(resource.0.to_string()))?;
        res.timetable.push(entry);
        Ok(())
    }

    fn check_type(&self, id: ResourceTypeId) -> FlowResult<()> {
        if id.0 < self.types.len() {
            Ok(())
        } else {
            Err(FlowError::UnknownResourceType(id.0.to_string()))
        }
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resources.iter().position(|r| r.name == name).map(ResourceId)
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources.iter().enumerate().map(|(i, r)| (ResourceId(i), r))
    }

    pub fn hold(&mut self, id: ResourceId, holder: Holder) {
        if let Some(r) = self.resources.get_mut(id.0) {
            r.state = ResourceState::Held(holder);
        }
    }

    pub fn free(&mut self, id: ResourceId) {
        if let Some(r) = self.resources.get_mut(id.0) {
            r.state = ResourceState::Available;
        }
    }

    pub fn cancel(&mut self, id: ResourceId, until: Timestamp) {
        if let Some(r) = self.resources.get_mut(id.0) {
            r.state = ResourceState::Cancelled { until };
        }
    }

    pub fn holder(&self, id: ResourceId) -> Option<Holder> {
        match self.resources.get(id.0)?.state {
            ResourceState::Held(holder) => Some(holder),
            _ => None,
        }
    }

    /// Picks distinct available resources covering every `(type, quantity)`
    /// requirement, searching depth-first so that a resource able to play
    /// several requested roles is not wasted on the wrong one.
    pub fn find_allocation(
        &self,
        requirements: &[(ResourceTypeId, u32)],
        now: Timestamp,
    ) -> Option<Vec<(ResourceId, ResourceTypeId)>> {
        let slots: Vec<ResourceTypeId> = requirements
            .iter()
            .flat_map(|(t, n)| std::iter::repeat_n(*t, *n as usize))
            .collect();
        let candidates: Vec<Vec<usize>> = slots
            .iter()
            .map(|t| {
                self.resources
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.is_available_as(*t, now))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();
        let mut used = vec![false; self.resources.len()];
        let mut chosen = Vec::with_capacity(slots.len());
        if self.assign(0, &slots, &candidates, &mut used, &mut chosen) {
            Some(
                chosen
                    .into_iter()
                    .zip(slots)
                    .map(|(r, t)| (ResourceId(r), t))
                    .collect(),
            )
        } else {
            None
        }
    }

    fn assign(
        &self,
        slot: usize,
        slots: &[ResourceTypeId],
        candidates: &[Vec<usize>],
        used: &mut [bool],
        chosen: &mut Vec<usize>,
    ) -> bool {
        if slot == slots.len() {
            return true;
        }
        // Same-type slots take candidates in increasing order to skip permutations.
        let floor = if slot > 0 && slots[slot - 1] == slots[slot] {
            chosen[slot - 1] + 1
        } else {
            0
        };
        for &r in &candidates[slot] {
            if r < floor || used[r] {
                continue;
            }
            used[r] = true;
            chosen.push(r);
            if self.assign(slot + 1, slots, candidates, used, chosen) {
                return true;
            }
            chosen.pop();
            used[r] = false;
        }
        false
    }
}
