//! ABOUTME: Pure evaluator for condition and convergence expressions
//! ABOUTME: Strict booleans, numeric/string comparisons, nothing else

use crate::binder::resolve_path;
use crate::context::RunContext;
use floe_compiler::expr::{BinaryOp, Expr, Literal};
use floe_core::error::{FloeError, Result};
use serde_json::Value;

/// Evaluate an expression to a value against the given context.
pub fn eval(ctx: &RunContext, expr: &Expr, node_id: &str) -> Result<Value> {
    match expr {
        Expr::Literal(literal) => Ok(literal_value(literal)),
        Expr::Path(path) => resolve_path(ctx, path, node_id),
        Expr::Not(inner) => {
            let value = eval(ctx, inner, node_id)?;
            match value {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(non_boolean(node_id, "!", &other)),
            }
        }
        Expr::Binary { op, left, right } => eval_binary(ctx, *op, left, right, node_id),
    }
}

/// Evaluate an expression that must produce a boolean.
pub fn eval_bool(ctx: &RunContext, expr: &Expr, node_id: &str) -> Result<bool> {
    match eval(ctx, expr, node_id)? {
        Value::Bool(b) => Ok(b),
        other => Err(FloeError::Validation {
            message: format!(
                "expression for `{node_id}` must evaluate to a boolean, got {other}"
            ),
            field: None,
        }),
    }
}

fn eval_binary(
    ctx: &RunContext,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    node_id: &str,
) -> Result<Value> {
    // && and || short-circuit on a strict boolean left side.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let lhs = match eval(ctx, left, node_id)? {
            Value::Bool(b) => b,
            other => return Err(non_boolean(node_id, logic_symbol(op), &other)),
        };
        match (op, lhs) {
            (BinaryOp::And, false) => return Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
            _ => {}
        }
        return match eval(ctx, right, node_id)? {
            Value::Bool(b) => Ok(Value::Bool(b)),
            other => Err(non_boolean(node_id, logic_symbol(op), &other)),
        };
    }

    let lhs = eval(ctx, left, node_id)?;
    let rhs = eval(ctx, right, node_id)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs, node_id)?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

/// Equality with numeric normalization: `1` equals `1.0`.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value, node_id: &str) -> Result<std::cmp::Ordering> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r).ok_or_else(|| FloeError::Validation {
            message: format!("expression for `{node_id}` compares NaN"),
            field: None,
        });
    }
    if let (Value::String(l), Value::String(r)) = (left, right) {
        return Ok(l.cmp(r));
    }
    Err(FloeError::Validation {
        message: format!(
            "expression for `{node_id}` compares incompatible types ({left} vs {right})"
        ),
        field: None,
    })
}

fn non_boolean(node_id: &str, op: &str, value: &Value) -> FloeError {
    FloeError::Validation {
        message: format!("`{op}` operand for `{node_id}` must be boolean, got {value}"),
        field: None,
    }
}

fn logic_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use floe_core::result::NodeResult;
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn ctx_with(node_id: &str, output: Value) -> Arc<RunContext> {
        let ctx = RunContext::root(Map::new());
        ctx.publish(node_id, NodeResult::success(output, Utc::now(), 1));
        ctx
    }

    fn eval_str(ctx: &RunContext, text: &str) -> Result<bool> {
        eval_bool(ctx, &Expr::parse(text).unwrap(), "test")
    }

    #[test]
    fn test_numeric_comparison() {
        let ctx = ctx_with("n1", json!({"count": 0}));
        assert!(!eval_str(&ctx, "${n1.count} > 0").unwrap());
        assert!(eval_str(&ctx, "${n1.count} >= 0").unwrap());
        assert!(eval_str(&ctx, "${n1.count} == 0").unwrap());
    }

    #[test]
    fn test_integer_float_equality() {
        let ctx = ctx_with("n1", json!({"count": 1}));
        assert!(eval_str(&ctx, "${n1.count} == 1.0").unwrap());
    }

    #[test]
    fn test_string_comparison() {
        let ctx = ctx_with("n1", json!({"label": "beta"}));
        assert!(eval_str(&ctx, "${n1.label} == 'beta'").unwrap());
        assert!(eval_str(&ctx, "${n1.label} > 'alpha'").unwrap());
        assert!(eval_str(&ctx, "${n1.label} != 'gamma'").unwrap());
    }

    #[test]
    fn test_logic_and_not() {
        let ctx = ctx_with("n1", json!({"ok": true, "count": 2}));
        assert!(eval_str(&ctx, "${n1.ok} && ${n1.count} > 1").unwrap());
        assert!(eval_str(&ctx, "!${n1.ok} || ${n1.count} == 2").unwrap());
    }

    #[test]
    fn test_short_circuit_skips_right() {
        // The right side references a missing node; && short-circuits on a
        // false left side before resolving it.
        let ctx = ctx_with("n1", json!({"ok": false}));
        assert!(!eval_str(&ctx, "${n1.ok} && ${ghost.x} == 1").unwrap());
    }

    #[test]
    fn test_non_boolean_condition_rejected() {
        let ctx = ctx_with("n1", json!({"count": 3}));
        let err = eval_str(&ctx, "${n1.count} && true").unwrap_err();
        assert!(err.to_string().contains("must be boolean"));

        let err = eval_bool(&ctx, &Expr::parse("${n1.count}").unwrap(), "test").unwrap_err();
        assert!(err.to_string().contains("must evaluate to a boolean"));
    }

    #[test]
    fn test_incompatible_comparison_rejected() {
        let ctx = ctx_with("n1", json!({"label": "a", "count": 1}));
        assert!(eval_str(&ctx, "${n1.label} < 1").is_err());
    }

    #[test]
    fn test_convergence_projection_roots() {
        let ctx = RunContext::root(Map::new());
        let mut locals = Map::new();
        locals.insert("iteration".to_string(), json!(3));
        locals.insert("accumulator".to_string(), json!({"score": 0.9}));
        let scoped = ctx.child(locals);

        assert!(eval_bool(
            &scoped,
            &Expr::parse("${accumulator.score} >= 0.8").unwrap(),
            "rec"
        )
        .unwrap());
        assert!(eval_bool(&scoped, &Expr::parse("${iteration} == 3").unwrap(), "rec").unwrap());
    }
}
