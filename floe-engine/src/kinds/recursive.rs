//! ABOUTME: Recursion node execution: bounded re-entry with convergence checks
//! ABOUTME: Sources re-run in iteration scopes; the parent context stays intact

use super::agent;
use super::KindOutput;
use crate::context::RunContext;
use crate::convergence;
use crate::lifecycle::{execute_node, NodeEnv};
use crate::scheduler::drive_plan;
use floe_compiler::expr::Expr;
use floe_compiler::plan::{CompiledPayload, RecursiveTarget};
use floe_core::error::{ErrorKind, FloeError, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) async fn run(env: &NodeEnv, cancel: CancellationToken) -> Result<KindOutput> {
    let CompiledPayload::Recursive {
        target,
        sources,
        convergence: condition,
        max_iterations,
        preserve_context,
    } = &env.node.payload
    else {
        return Err(FloeError::internal("recursive executor on non-recursive node"));
    };

    // The accumulator carries the most recent output of every source.
    // Sources that already ran as ordinary upstream dependencies seed it;
    // cycle-driven sources that never ran are executed on the first
    // iteration instead.
    let mut accumulator: Map<String, Value> = Map::new();
    let mut unseeded: Vec<String> = Vec::new();
    for source in sources {
        match env.ctx.get(source) {
            Some(result) if result.success => merge_into(&mut accumulator, &result.output, source),
            _ => unseeded.push(source.clone()),
        }
    }

    let mut carried = accumulator.clone();
    let mut iterations = 0u32;
    let mut pending: Option<Vec<String>> = if sources.is_empty() {
        Some(Vec::new())
    } else if unseeded.is_empty() {
        None
    } else {
        Some(unseeded)
    };

    loop {
        if cancel.is_cancelled() {
            return Err(FloeError::Cancelled {
                reason: env.shared.cancel_reason_text(),
            });
        }

        if let Some(to_run) = pending.take() {
            run_body(
                env,
                target,
                &to_run,
                sources.is_empty(),
                &mut accumulator,
                &carried,
                *preserve_context,
                *max_iterations,
                &cancel,
            )
            .await?;
        }
        iterations += 1;

        if eval_convergence(env, condition, iterations, &accumulator, &carried)? {
            debug!(node = %env.node.id, iterations, "recursion converged");
            return Ok(KindOutput::value(json!({
                "converged": true,
                "iterations": iterations,
                "result": accumulator,
            })));
        }
        if iterations >= *max_iterations {
            debug!(node = %env.node.id, iterations, "recursion hit iteration cap");
            return Ok(KindOutput::value(json!({
                "converged": false,
                "iterations": iterations,
                "result": accumulator,
            })));
        }

        if *preserve_context {
            carried = accumulator.clone();
        }
        pending = Some(if sources.is_empty() {
            Vec::new()
        } else {
            sources.clone()
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_body(
    env: &NodeEnv,
    target: &RecursiveTarget,
    source_ids: &[String],
    target_is_body: bool,
    accumulator: &mut Map<String, Value>,
    carried: &Map<String, Value>,
    preserve_context: bool,
    max_iterations: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    if target_is_body {
        // No declared sources: the referenced component itself is the
        // iteration body, fed with the accumulator.
        match target {
            RecursiveTarget::Workflow(sub_plan) => {
                let sub_ctx = RunContext::root(accumulator.clone());
                let outcome = drive_plan(
                    Arc::clone(&env.shared),
                    Arc::clone(sub_plan),
                    Arc::clone(&sub_ctx),
                )
                .await;
                if !outcome.success {
                    let (kind, message) = env
                        .shared
                        .first_error
                        .lock()
                        .clone()
                        .unwrap_or((ErrorKind::Internal, "recursion body failed".to_string()));
                    return Err(FloeError::Nested { kind, message });
                }
                for id in &sub_plan.terminal_level_ids {
                    if let Some(result) = sub_ctx.get(id) {
                        merge_into(accumulator, &result.output, id);
                    }
                }
            }
            RecursiveTarget::Agent(handle) => {
                let (output, _tokens) = agent::run_loop(
                    &env.shared,
                    &env.node.id,
                    handle,
                    &[],
                    max_iterations,
                    accumulator.clone(),
                    cancel,
                )
                .await?;
                merge_into(accumulator, &output, &env.node.id);
            }
        }
        return Ok(());
    }

    let mut locals = Map::new();
    if preserve_context {
        locals.insert(
            "recursive_context".to_string(),
            Value::Object(carried.clone()),
        );
    }
    let scope = env.ctx.child(locals);

    for source_id in source_ids {
        let Some(source_node) = env.plan.node(source_id) else {
            return Err(FloeError::internal(format!(
                "recursion source `{source_id}` missing from plan"
            )));
        };
        let outcome = execute_node(NodeEnv {
            shared: Arc::clone(&env.shared),
            plan: Arc::clone(&env.plan),
            ctx: Arc::clone(&scope),
            node: Arc::clone(source_node),
            cancel: cancel.clone(),
        })
        .await;
        if !outcome.result.success {
            return Err(FloeError::Nested {
                kind: outcome.result.error_kind.unwrap_or(ErrorKind::Internal),
                message: format!(
                    "recursion source `{source_id}` failed: {}",
                    outcome.result.error_message.unwrap_or_default()
                ),
            });
        }
        merge_into(accumulator, &outcome.result.output, source_id);
    }
    Ok(())
}

fn eval_convergence(
    env: &NodeEnv,
    condition: &Expr,
    iteration: u32,
    accumulator: &Map<String, Value>,
    carried: &Map<String, Value>,
) -> Result<bool> {
    let mut projection = Map::new();
    projection.insert("iteration".to_string(), json!(iteration));
    projection.insert(
        "accumulator".to_string(),
        Value::Object(accumulator.clone()),
    );
    projection.insert(
        "recursive_context".to_string(),
        Value::Object(carried.clone()),
    );
    let scope = env.ctx.child(projection);
    convergence::eval_bool(&scope, condition, &env.node.id)
}

/// Object outputs merge field-wise; anything else lands under the source's
/// node id.
fn merge_into(accumulator: &mut Map<String, Value>, output: &Value, source_id: &str) {
    match output {
        Value::Object(fields) => {
            for (key, value) in fields {
                accumulator.insert(key.clone(), value.clone());
            }
        }
        other => {
            accumulator.insert(source_id.to_string(), other.clone());
        }
    }
}
