//! ABOUTME: Loop node execution: per-item scoped subgraph runs
//! ABOUTME: Aggregates iteration outputs as an ordered list

use super::KindOutput;
use crate::binder;
use crate::lifecycle::{execute_node, NodeEnv};
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{ErrorKind, FloeError, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) async fn run(env: &NodeEnv, cancel: CancellationToken) -> Result<KindOutput> {
    let CompiledPayload::Loop {
        items_source,
        body_order,
        max_iterations,
    } = &env.node.payload
    else {
        return Err(FloeError::internal("loop executor on non-loop node"));
    };

    let items_value = binder::render_template(&env.ctx, items_source, &env.node.id)?;
    let Some(items) = items_value.as_array() else {
        return Err(FloeError::Validation {
            message: format!(
                "items_source of `{}` must resolve to an array",
                env.node.id
            ),
            field: None,
        });
    };

    let truncated = items.len() > *max_iterations as usize;
    if truncated {
        debug!(node = %env.node.id, items = items.len(), max_iterations, "loop truncated at iteration cap");
    }

    let mut outputs: Vec<Value> = Vec::new();
    for (index, item) in items.iter().take(*max_iterations as usize).enumerate() {
        if cancel.is_cancelled() {
            return Err(FloeError::Cancelled {
                reason: env.shared.cancel_reason_text(),
            });
        }

        let mut locals = Map::new();
        locals.insert("item".to_string(), item.clone());
        locals.insert("index".to_string(), json!(index));
        let scope = env.ctx.child(locals);

        let mut last = Value::Null;
        for body_id in body_order {
            let Some(body_node) = env.plan.node(body_id) else {
                return Err(FloeError::internal(format!(
                    "loop body `{body_id}` missing from plan"
                )));
            };
            let outcome = execute_node(NodeEnv {
                shared: Arc::clone(&env.shared),
                plan: Arc::clone(&env.plan),
                ctx: Arc::clone(&scope),
                node: Arc::clone(body_node),
                cancel: cancel.clone(),
            })
            .await;
            if !outcome.result.success {
                return Err(FloeError::Nested {
                    kind: outcome.result.error_kind.unwrap_or(ErrorKind::Internal),
                    message: format!(
                        "loop body `{body_id}` failed on iteration {index}: {}",
                        outcome.result.error_message.unwrap_or_default()
                    ),
                });
            }
            last = outcome.result.output;
        }
        outputs.push(last);
    }

    Ok(KindOutput::value(json!({
        "items": outputs,
        "count": outputs.len(),
        "truncated": truncated,
    })))
}
