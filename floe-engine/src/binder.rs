//! ABOUTME: Template binder resolving compiled path expressions at run time
//! ABOUTME: Purely structural; missing keys fail UnresolvedBinding, no coercion

use crate::context::RunContext;
use floe_compiler::plan::{BindTarget, Binding};
use floe_compiler::template::{Accessor, PathExpr, PathRoot, Segment, TemplateString};
use floe_core::error::{FloeError, Result};
use serde_json::{Map, Value};

fn unresolved(path: &PathExpr, node: &str) -> FloeError {
    FloeError::UnresolvedBinding {
        path: path.to_string(),
        node: Some(node.to_string()),
    }
}

/// Resolve a path expression against the context for the given node.
pub fn resolve_path(ctx: &RunContext, expr: &PathExpr, node_id: &str) -> Result<Value> {
    let rooted = match &expr.root {
        PathRoot::Node(id) => {
            // A published result wins; otherwise a literal override supplied
            // in the run's initial inputs may stand in for the node.
            match ctx.get(id) {
                Some(result) if result.success => result.output.clone(),
                _ => ctx
                    .initial_input(id)
                    .cloned()
                    .ok_or_else(|| unresolved(expr, node_id))?,
            }
        }
        PathRoot::Inputs => Value::Object(ctx.initial_inputs().clone()),
        PathRoot::Item => ctx.local("item").ok_or_else(|| unresolved(expr, node_id))?,
        PathRoot::Index => ctx.local("index").ok_or_else(|| unresolved(expr, node_id))?,
        PathRoot::Iteration => ctx
            .local("iteration")
            .ok_or_else(|| unresolved(expr, node_id))?,
        PathRoot::Accumulator => ctx
            .local("accumulator")
            .ok_or_else(|| unresolved(expr, node_id))?,
        PathRoot::RecursiveContext => ctx
            .local("recursive_context")
            .ok_or_else(|| unresolved(expr, node_id))?,
    };

    let mut current = rooted;
    for accessor in &expr.accessors {
        current = match (accessor, current) {
            (Accessor::Field(name) | Accessor::Key(name), Value::Object(mut map)) => map
                .remove(name)
                .ok_or_else(|| unresolved(expr, node_id))?,
            (Accessor::Index(i), Value::Array(mut items)) => {
                if *i >= items.len() {
                    return Err(unresolved(expr, node_id));
                }
                items.swap_remove(*i)
            }
            _ => return Err(unresolved(expr, node_id)),
        };
    }
    Ok(current)
}

/// Render a template. A template that is exactly one expression binds to
/// the referenced value itself; anything else renders to a string.
pub fn render_template(ctx: &RunContext, template: &TemplateString, node_id: &str) -> Result<Value> {
    if let Some(expr) = template.single_expr() {
        return resolve_path(ctx, expr, node_id);
    }
    let mut rendered = String::new();
    for segment in template.segments() {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Expr(expr) => {
                let value = resolve_path(ctx, expr, node_id)?;
                rendered.push_str(&value_to_display(&value));
            }
        }
    }
    Ok(Value::String(rendered))
}

/// Render a template to a string unconditionally (prompt rendering).
pub fn render_template_string(
    ctx: &RunContext,
    template: &TemplateString,
    node_id: &str,
) -> Result<String> {
    match render_template(ctx, template, node_id)? {
        Value::String(text) => Ok(text),
        other => Ok(value_to_display(&other)),
    }
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Compose a tool node's effective inputs: authored literals, overwritten
/// by resolved template bindings, plus iteration locals when scoped.
pub fn effective_args(
    ctx: &RunContext,
    literal_args: &Map<String, Value>,
    bindings: &[Binding],
    node_id: &str,
) -> Result<Map<String, Value>> {
    let mut effective = literal_args.clone();
    for binding in bindings {
        let value = render_template(ctx, &binding.template, node_id)?;
        write_target(&mut effective, &binding.target, value, node_id)?;
    }
    apply_scope_locals(ctx, &mut effective);
    Ok(effective)
}

/// Iteration locals are composed into every effective input object so
/// contained nodes can consume `item`/`index` without declaring bindings.
pub fn apply_scope_locals(ctx: &RunContext, effective: &mut Map<String, Value>) {
    for key in ["item", "index"] {
        if !effective.contains_key(key) {
            if let Some(value) = ctx.local(key) {
                effective.insert(key.to_string(), value);
            }
        }
    }
}

fn write_target(
    root: &mut Map<String, Value>,
    target: &[BindTarget],
    value: Value,
    node_id: &str,
) -> Result<()> {
    let missing = || FloeError::Internal {
        message: format!("binding target vanished from args of `{node_id}`"),
    };

    match target {
        [] => Err(missing()),
        [BindTarget::Key(key)] => {
            root.insert(key.clone(), value);
            Ok(())
        }
        [BindTarget::Key(key), rest @ ..] => {
            let slot = root.get_mut(key).ok_or_else(missing)?;
            write_nested(slot, rest, value, node_id)
        }
        [BindTarget::Index(_), ..] => Err(missing()),
    }
}

fn write_nested(
    slot: &mut Value,
    target: &[BindTarget],
    value: Value,
    node_id: &str,
) -> Result<()> {
    let missing = || FloeError::Internal {
        message: format!("binding target vanished from args of `{node_id}`"),
    };

    match target {
        [] => {
            *slot = value;
            Ok(())
        }
        [BindTarget::Key(key), rest @ ..] => match slot {
            Value::Object(map) => {
                let next = map.get_mut(key).ok_or_else(missing)?;
                write_nested(next, rest, value, node_id)
            }
            _ => Err(missing()),
        },
        [BindTarget::Index(i), rest @ ..] => match slot {
            Value::Array(items) => {
                let next = items.get_mut(*i).ok_or_else(missing)?;
                write_nested(next, rest, value, node_id)
            }
            _ => Err(missing()),
        },
    }
}
