use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::actions::EvalScope;
use crate::runtime::Timestamp;
use crate::runtime::thread::Held;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Per-entity state shared by all of its threads.
#[derive(Debug, Clone)]
pub struct EntityContext {
    pub id: EntityId,
    pub created_at: Timestamp,
    pub vars: HashMap<String, Value>,
    /// Resources parked under named sites by request nodes.
    pub held: BTreeMap<u32, Vec<Held>>,
}

impl EntityContext {
    pub fn new(id: EntityId, created_at: Timestamp, vars: HashMap<String, Value>) -> Self {
        Self {
            id,
            created_at,
            vars,
            held: BTreeMap::new(),
        }
    }

    pub fn scope(&self, now: Timestamp) -> EvalScope {
        EvalScope::new(&self.vars, now, self.id.0)
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn set_var(&mut self, key: &str, value: Value) {
        self.vars.insert(key.to_string(), value);
    }
}
