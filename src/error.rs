use serde::Serialize;
use thiserror::Error;

use crate::nodes::NodeIndex;

/// Errors raised while building a model or reported while it runs.
///
/// Runtime variants never cross the event loop: the engine wraps them in
/// `FlowEvent::Error` and keeps stepping.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum FlowError {
    #[error("Node index {0} out of bounds")]
    UnknownNode(NodeIndex),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Invalid timetable for resource {resource}: {message}")]
    Timetable { resource: String, message: String },

    #[error("Cannot link {from} -> {to}: {reason}")]
    InvalidLink {
        from: NodeIndex,
        to: NodeIndex,
        reason: String,
    },

    #[error("Invalid expression '{expr}': {message}")]
    Expression { expr: String, message: String },

    #[error("Node {node} is not a {expected} node")]
    WrongKind { node: NodeIndex, expected: String },

    #[error("Configuration error at node {node}: {message}")]
    Configuration { node: NodeIndex, message: String },

    #[error("Invariant violated at node {node}: {message}")]
    Invariant { node: NodeIndex, message: String },
}

impl FlowError {
    pub fn configuration(node: NodeIndex, message: impl Into<String>) -> Self {
        FlowError::Configuration {
            node,
            message: message.into(),
        }
    }

    pub fn invariant(node: NodeIndex, message: impl Into<String>) -> Self {
        FlowError::Invariant {
            node,
            message: message.into(),
        }
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
