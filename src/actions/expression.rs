use std::collections::HashMap;

use evalexpr::{
    build_operator_tree, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext,
    Node as EvalNode,
};
use serde_json::{json, Value};

use crate::error::{FlowError, FlowResult};
use crate::runtime::Timestamp;

/// Variables visible to an expression: the entity's own variables plus
/// `now` and `entity`.
pub struct EvalScope {
    ctx: HashMapContext<DefaultNumericTypes>,
}

impl EvalScope {
    pub fn new(vars: &HashMap<String, Value>, now: Timestamp, entity: u64) -> Self {
        let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
        for (k, v) in vars {
            if let Some(ev) = to_eval_value(v) {
                let _ = ctx.set_value(k.clone(), ev);
            }
        }
        let _ = ctx.set_value("now".to_string(), evalexpr::Value::Int(now as i64));
        let _ = ctx.set_value("entity".to_string(), evalexpr::Value::Int(entity as i64));
        Self { ctx }
    }
}

fn to_eval_value(v: &Value) -> Option<evalexpr::Value<DefaultNumericTypes>> {
    match v {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(evalexpr::Value::Int(i))
            } else {
                n.as_f64().map(evalexpr::Value::Float)
            }
        }
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        _ => None,
    }
}

pub(crate) fn to_json_value(v: evalexpr::Value<DefaultNumericTypes>) -> Option<Value> {
    match v {
        evalexpr::Value::String(s) => Some(Value::String(s)),
        evalexpr::Value::Int(i) => Some(json!(i)),
        evalexpr::Value::Float(f) => Some(json!(f)),
        evalexpr::Value::Boolean(b) => Some(Value::Bool(b)),
        _ => None,
    }
}

fn compile(src: &str) -> FlowResult<EvalNode<DefaultNumericTypes>> {
    // DSL authors may write `${x} > 3`; the placeholders are plain identifiers here.
    let clean = src.replace("${", "").replace('}', "");
    build_operator_tree::<DefaultNumericTypes>(&clean).map_err(|e| FlowError::Expression {
        expr: src.to_string(),
        message: e.to_string(),
    })
}

/// A boolean guard. The default guard always holds.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    raw: String,
    tree: Option<EvalNode<DefaultNumericTypes>>,
}

impl Condition {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn parse(src: &str) -> FlowResult<Self> {
        Ok(Self {
            raw: src.to_string(),
            tree: Some(compile(src)?),
        })
    }

    pub fn raw(&self) -> &str {
        if self.tree.is_none() { "true" } else { &self.raw }
    }

    pub fn evaluate(&self, scope: &EvalScope) -> FlowResult<bool> {
        match &self.tree {
            None => Ok(true),
            Some(tree) => tree
                .eval_boolean_with_context(&scope.ctx)
                .map_err(|e| FlowError::Expression {
                    expr: self.raw.clone(),
                    message: e.to_string(),
                }),
        }
    }
}

/// A numeric expression used for durations and iteration counts.
#[derive(Debug, Clone)]
pub struct Expression {
    raw: String,
    tree: Option<EvalNode<DefaultNumericTypes>>,
    constant: u64,
}

impl Expression {
    pub fn constant(value: u64) -> Self {
        Self {
            raw: value.to_string(),
            tree: None,
            constant: value,
        }
    }

    pub fn parse(src: &str) -> FlowResult<Self> {
        if let Ok(value) = src.trim().parse::<u64>() {
            return Ok(Self::constant(value));
        }
        Ok(Self {
            raw: src.to_string(),
            tree: Some(compile(src)?),
            constant: 0,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Evaluates to a non-negative whole number of time units; floats are
    /// rounded, negatives clamp to zero and values past `u64::MAX` fail.
    pub fn evaluate(&self, scope: &EvalScope) -> FlowResult<u64> {
        let Some(tree) = &self.tree else {
            return Ok(self.constant);
        };
        let value = tree
            .eval_with_context(&scope.ctx)
            .map_err(|e| FlowError::Expression {
                expr: self.raw.clone(),
                message: e.to_string(),
            })?;
        match value {
            evalexpr::Value::Int(i) => Ok(i.max(0) as u64),
            evalexpr::Value::Float(f) if f.is_finite() && f < u64::MAX as f64 => {
                Ok(f.max(0.0).round() as u64)
            }
            evalexpr::Value::Float(f) => Err(FlowError::Expression {
                expr: self.raw.clone(),
                message: format!("{} is out of range for a time value", f),
            }),
            other => Err(FlowError::Expression {
                expr: self.raw.clone(),
                message: format!("expected a number, got {:?}", other),
            }),
        }
    }
}

/// Evaluates an arbitrary expression and converts the result back to JSON.
pub(crate) fn evaluate_value(
    tree: &EvalNode<DefaultNumericTypes>,
    raw: &str,
    scope: &EvalScope,
) -> FlowResult<Value> {
    let value = tree
        .eval_with_context(&scope.ctx)
        .map_err(|e| FlowError::Expression {
            expr: raw.to_string(),
            message: e.to_string(),
        })?;
    to_json_value(value).ok_or_else(|| FlowError::Expression {
        expr: raw.to_string(),
        message: "result is not a scalar".to_string(),
    })
}

pub(crate) fn compile_value(src: &str) -> FlowResult<EvalNode<DefaultNumericTypes>> {
    compile(src)
}
