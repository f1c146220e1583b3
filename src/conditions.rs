//! Sequence-flow conditions as minijinja expressions.
//!
//! A condition is evaluated against the gateway's variable view:
//! ```json
//! { "id": "approve", "type": "sequence_flow", "source": "gw", "target": "ok",
//!   "condition": "amount < 1000 and customer.tier == 'gold'" }
//! ```
//! Flows without a condition are always taken.

use bpmflow_engine::{Fault, StepEvent};
use minijinja::{Environment, Value};

/// Evaluate one condition expression against a JSON context.
pub fn evaluate(flow_id: &str, condition: &str, context: &serde_json::Value) -> Result<bool, Fault> {
  let env = Environment::new();
  let expr = env
    .compile_expression(condition)
    .map_err(|e| Fault::gateway("ConditionSyntax", format!("flow '{}': {}", flow_id, e)))?;
  let result = expr
    .eval(Value::from_serialize(context))
    .map_err(|e| Fault::gateway("ConditionError", format!("flow '{}': {}", flow_id, e)))?;
  Ok(result.is_true())
}

/// Flow predicate for `ProcessHooks::flow_valid`.
pub fn flow_predicate(event: &StepEvent<'_>) -> Result<bool, Fault> {
  match event.element.condition() {
    Some(condition) if !condition.trim().is_empty() => {
      evaluate(&event.element.id, condition, &event.variables.to_value())
    }
    _ => Ok(true),
  }
}
