use std::collections::HashMap;

use evalexpr::{DefaultNumericTypes, Node as EvalNode};
use serde_json::Value;

use crate::error::{FlowError, FlowResult};

pub mod expression;

pub use expression::{Condition, EvalScope, Expression};

/// `var = expr` evaluated against an entity's variables; the side effect of an
/// `Assign` node.
#[derive(Debug, Clone)]
pub struct Assignment {
    target: String,
    raw: String,
    tree: EvalNode<DefaultNumericTypes>,
}

impl Assignment {
    pub fn parse(src: &str) -> FlowResult<Self> {
        let (target, rhs) = split_assignment(src).ok_or_else(|| FlowError::Expression {
            expr: src.to_string(),
            message: "expected `name = expression`".to_string(),
        })?;
        if target.is_empty() || !target.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(FlowError::Expression {
                expr: src.to_string(),
                message: format!("invalid assignment target '{}'", target),
            });
        }
        Ok(Self {
            target: target.to_string(),
            raw: rhs.to_string(),
            tree: expression::compile_value(rhs)?,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn apply(&self, scope: &EvalScope, vars: &mut HashMap<String, Value>) -> FlowResult<()> {
        let value = expression::evaluate_value(&self.tree, &self.raw, scope)?;
        vars.insert(self.target.clone(), value);
        Ok(())
    }
}

/// Finds the first `=` that is not part of `==`, `!=`, `<=` or `>=`.
fn split_assignment(src: &str) -> Option<(&str, &str)> {
    let bytes = src.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = if i > 0 { bytes[i - 1] } else { b' ' };
        let next = bytes.get(i + 1).copied().unwrap_or(b' ');
        if next == b'=' || matches!(prev, b'=' | b'!' | b'<' | b'>') {
            continue;
        }
        return Some((src[..i].trim(), src[i + 1..].trim()));
    }
    None
}
