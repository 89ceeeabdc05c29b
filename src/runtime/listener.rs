use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::FlowError;
use crate::nodes::NodeIndex;
use crate::resources::{ResourceId, ResourceTypeId};
use crate::runtime::Timestamp;
use crate::runtime::context::EntityId;
use crate::runtime::thread::ThreadId;

/// Everything observable about a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    EntityCreated {
        entity: EntityId,
    },
    Request {
        entity: EntityId,
        thread: ThreadId,
        node: NodeIndex,
        executable: bool,
    },
    Start {
        entity: EntityId,
        thread: ThreadId,
        node: NodeIndex,
        work_group: Option<usize>,
    },
    Finish {
        entity: EntityId,
        thread: ThreadId,
        node: NodeIndex,
    },
    Queued {
        entity: EntityId,
        thread: ThreadId,
        node: NodeIndex,
    },
    ResourceAcquired {
        entity: EntityId,
        node: NodeIndex,
        resource: ResourceId,
        as_type: ResourceTypeId,
    },
    ResourceReleased {
        entity: EntityId,
        node: NodeIndex,
        resource: ResourceId,
    },
    CancelOn {
        resource: ResourceId,
        until: Timestamp,
    },
    CancelOff {
        resource: ResourceId,
    },
    RoleOn {
        resource: ResourceId,
        resource_type: ResourceTypeId,
    },
    RoleOff {
        resource: ResourceId,
        resource_type: ResourceTypeId,
    },
    Interrupt {
        entity: EntityId,
        thread: ThreadId,
        node: NodeIndex,
        remaining: u64,
    },
    TokenTerminated {
        entity: EntityId,
        thread: ThreadId,
        node: NodeIndex,
        executable: bool,
        path: Vec<NodeIndex>,
    },
    EntityFinished {
        entity: EntityId,
    },
    Error {
        error: FlowError,
    },
}

impl FlowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowEvent::EntityCreated { .. } => "entity_created",
            FlowEvent::Request { .. } => "request",
            FlowEvent::Start { .. } => "start",
            FlowEvent::Finish { .. } => "finish",
            FlowEvent::Queued { .. } => "queued",
            FlowEvent::ResourceAcquired { .. } => "resource_acquired",
            FlowEvent::ResourceReleased { .. } => "resource_released",
            FlowEvent::CancelOn { .. } => "cancel_on",
            FlowEvent::CancelOff { .. } => "cancel_off",
            FlowEvent::RoleOn { .. } => "role_on",
            FlowEvent::RoleOff { .. } => "role_off",
            FlowEvent::Interrupt { .. } => "interrupt",
            FlowEvent::TokenTerminated { .. } => "token_terminated",
            FlowEvent::EntityFinished { .. } => "entity_finished",
            FlowEvent::Error { .. } => "error",
        }
    }

    pub fn entity(&self) -> Option<EntityId> {
        match self {
            FlowEvent::EntityCreated { entity }
            | FlowEvent::Request { entity, .. }
            | FlowEvent::Start { entity, .. }
            | FlowEvent::Finish { entity, .. }
            | FlowEvent::Queued { entity, .. }
            | FlowEvent::ResourceAcquired { entity, .. }
            | FlowEvent::ResourceReleased { entity, .. }
            | FlowEvent::Interrupt { entity, .. }
            | FlowEvent::TokenTerminated { entity, .. }
            | FlowEvent::EntityFinished { entity } => Some(*entity),
            _ => None,
        }
    }
}

/// Receives every event the engine emits, in order.
pub trait SimListener: Send {
    fn on_event(&mut self, now: Timestamp, event: &FlowEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingListener;

impl SimListener for TracingListener {
    fn on_event(&mut self, now: Timestamp, event: &FlowEvent) {
        match event {
            FlowEvent::Error { error } => {
                warn!(now, error = %error, "Simulation error");
            }
            FlowEvent::EntityCreated { entity } => {
                info!(now, entity = %entity, "Entity created");
            }
            FlowEvent::EntityFinished { entity } => {
                info!(now, entity = %entity, "Entity finished");
            }
            FlowEvent::Interrupt { entity, node, remaining, .. } => {
                info!(now, entity = %entity, node, remaining, "Activity interrupted");
            }
            other => {
                debug!(now, entity = ?other.entity(), kind = other.kind(), event = ?other);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recorded {
    pub at: Timestamp,
    pub event: FlowEvent,
}

/// Shared view of what a `RecordingListener` captured.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<Recorded>>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Recorded> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|r| r.event.kind() == kind)
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.of_kind(kind).len()
    }

    pub fn errors(&self) -> Vec<FlowError> {
        self.events()
            .into_iter()
            .filter_map(|r| match r.event {
                FlowEvent::Error { error } => Some(error),
                _ => None,
            })
            .collect()
    }

    /// Timestamps at which `node` started.
    pub fn starts_of(&self, node: NodeIndex) -> Vec<Timestamp> {
        self.events()
            .into_iter()
            .filter_map(|r| match r.event {
                FlowEvent::Start { node: n, .. } if n == node => Some(r.at),
                _ => None,
            })
            .collect()
    }

    pub fn finishes_of(&self, node: NodeIndex) -> Vec<Timestamp> {
        self.events()
            .into_iter()
            .filter_map(|r| match r.event {
                FlowEvent::Finish { node: n, .. } if n == node => Some(r.at),
                _ => None,
            })
            .collect()
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingListener {
    log: EventLog,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }
}

impl SimListener for RecordingListener {
    fn on_event(&mut self, now: Timestamp, event: &FlowEvent) {
        if let Ok(mut events) = self.log.inner.lock() {
            events.push(Recorded {
                at: now,
                event: event.clone(),
            });
        }
    }
}

/// Streams events to an async consumer. Sends never block the simulation;
/// a dropped receiver silently discards events.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Recorded>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SimListener for ChannelListener {
    fn on_event(&mut self, now: Timestamp, event: &FlowEvent) {
        let _ = self.tx.send(Recorded {
            at: now,
            event: event.clone(),
        });
    }
}
