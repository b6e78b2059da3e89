//! ABOUTME: Per-node lifecycle: bind, validate, preflight, execute, retry, publish
//! ABOUTME: Timeouts are timer-driven cancellation with a grace window

use crate::binder;
use crate::context::RunContext;
use crate::kinds::{self, KindOutput};
use crate::runtime::EngineShared;
use chrono::{DateTime, Utc};
use floe_compiler::plan::{CompiledPayload, Plan, PlanNode, PolicySnapshot};
use floe_core::error::{ErrorKind, FloeError, Result};
use floe_core::events::RunEvent;
use floe_core::result::NodeResult;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything one node execution needs.
pub(crate) struct NodeEnv {
    pub shared: Arc<EngineShared>,
    pub plan: Arc<Plan>,
    pub ctx: Arc<RunContext>,
    pub node: Arc<PlanNode>,
    /// Plan-scoped cancellation (external cancel or sibling halt).
    pub cancel: CancellationToken,
}

/// What the scheduler gets back for a finished node.
pub(crate) struct ExecOutcome {
    pub id: String,
    pub result: NodeResult,
    /// Node ids pruned by a condition's unselected branch.
    pub prune: Vec<String>,
}

/// Execute one node through its full lifecycle and publish the result.
///
/// Boxed because loop/parallel/recursion bodies re-enter node execution.
pub(crate) fn execute_node(env: NodeEnv) -> Pin<Box<dyn Future<Output = ExecOutcome> + Send>> {
    Box::pin(async move {
        let run_id = env.shared.run_id;
        let id = env.node.id.clone();
        let started_at = Utc::now();
        env.shared.emitter.emit(RunEvent::node_started(run_id, &id));
        debug!(node = %id, kind = %env.node.kind, "node started");

        let (result, prune) = run_lifecycle(&env, started_at).await;
        let published = env.ctx.publish(&id, result);
        env.shared
            .emitter
            .emit(RunEvent::node_finished(run_id, &id, &published));
        debug!(node = %id, success = published.success, attempts = published.attempts, "node finished");

        ExecOutcome {
            id,
            result: published.as_ref().clone(),
            prune,
        }
    })
}

async fn run_lifecycle(env: &NodeEnv, started_at: DateTime<Utc>) -> (NodeResult, Vec<String>) {
    // 1. Bind inputs. Binding failures are terminal; there is nothing to
    // retry against.
    let effective = match bind_inputs(env) {
        Ok(map) => map,
        Err(e) => return (NodeResult::failure(&e, started_at, 0), Vec::new()),
    };

    // 2. Validate inputs against the declared schema; no attempt, no retry.
    if let Some(schema) = &env.node.input_schema {
        if let Err(e) = schema.validate(&effective) {
            return (NodeResult::failure(&e, started_at, 0), Vec::new());
        }
    }

    // 3. Budget preflight before anything costs money.
    let cost = env
        .shared
        .estimator
        .estimate(env.node.kind, &env.node.id, &effective);
    if let Err(e) = env.shared.budget.preflight(cost, &env.node.id) {
        return (NodeResult::failure(&e, started_at, 0), Vec::new());
    }

    // 4-6. Attempt loop with exponential backoff.
    let policy = &env.node.policy;
    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;
    loop {
        attempt += 1;
        env.shared.emitter.emit(RunEvent::node_attempt(
            env.shared.run_id,
            &env.node.id,
            attempt,
            last_error.as_deref(),
        ));

        let attempted = run_attempt(env, &effective).await.and_then(|output| {
            validate_output(env, &output.output)?;
            Ok(output)
        });

        match attempted {
            Ok(output) => {
                let result = NodeResult::success(output.output, started_at, attempt)
                    .with_cost(cost)
                    .with_tokens(output.tokens);
                return (result, output.prune);
            }
            Err(e) => {
                if should_retry(policy, &e, attempt) && !env.cancel.is_cancelled() {
                    debug!(node = %env.node.id, attempt, error = %e, "retrying after backoff");
                    last_error = Some(e.to_string());
                    tokio::time::sleep(policy.retry.backoff_for_attempt(attempt)).await;
                    continue;
                }
                return (
                    NodeResult::failure(&e, started_at, attempt).with_cost(cost),
                    Vec::new(),
                );
            }
        }
    }
}

/// One execution attempt under the node's timeout. The timer cancels the
/// node's child token, grants the grace window, then abandons the task.
async fn run_attempt(env: &NodeEnv, effective: &Map<String, Value>) -> Result<KindOutput> {
    let node_cancel = env.cancel.child_token();
    let grace = Duration::from_millis(env.shared.options.cancel_grace_ms);
    let timeout_ms = env.node.policy.timeout_ms;

    let fut = kinds::run_kind(env, effective, node_cancel.clone());
    tokio::pin!(fut);
    let timer = tokio::time::sleep(Duration::from_millis(timeout_ms));
    tokio::pin!(timer);

    tokio::select! {
        result = &mut fut => result,
        () = &mut timer => {
            node_cancel.cancel();
            let _ = tokio::time::timeout(grace, &mut fut).await;
            Err(FloeError::Timeout {
                node: env.node.id.clone(),
                timeout_ms,
            })
        }
        () = env.cancel.cancelled() => {
            node_cancel.cancel();
            let _ = tokio::time::timeout(grace, &mut fut).await;
            Err(FloeError::Cancelled {
                reason: env.shared.cancel_reason_text(),
            })
        }
    }
}

fn validate_output(env: &NodeEnv, output: &Value) -> Result<()> {
    let Some(schema) = &env.node.output_schema else {
        return Ok(());
    };
    if schema.is_empty() {
        return Ok(());
    }
    match output.as_object() {
        Some(object) => schema.validate(object),
        None => Err(FloeError::Validation {
            message: format!(
                "output of `{}` must be an object to match its declared schema",
                env.node.id
            ),
            field: None,
        }),
    }
}

fn should_retry(policy: &PolicySnapshot, error: &FloeError, attempt: u32) -> bool {
    if attempt >= policy.retry.max_attempts {
        return false;
    }
    let kind = error.kind();
    if !policy.retry.retries(kind) {
        return false;
    }
    // Provider failures only retry when the provider flagged them transient.
    if kind == ErrorKind::LlmProvider && !error.is_transient() {
        return false;
    }
    true
}

/// Compose the effective input object per kind: declarative payload,
/// resolved template values, and iteration locals.
fn bind_inputs(env: &NodeEnv) -> Result<Map<String, Value>> {
    match &env.node.payload {
        CompiledPayload::Tool {
            literal_args,
            bindings,
            ..
        } => binder::effective_args(&env.ctx, literal_args, bindings, &env.node.id),
        CompiledPayload::Llm { prompt, .. } => {
            // The rendered prompt is the llm node's one bound input; render
            // here so unresolved bindings fail before any attempt.
            let rendered = binder::render_template_string(&env.ctx, prompt, &env.node.id)?;
            let mut effective = Map::new();
            effective.insert("prompt".to_string(), Value::String(rendered));
            binder::apply_scope_locals(&env.ctx, &mut effective);
            Ok(effective)
        }
        CompiledPayload::Code { .. } => {
            // The sandbox sees upstream outputs keyed by node id plus any
            // iteration locals.
            let mut effective = Map::new();
            for dep in &env.node.dependencies {
                if let Some(result) = env.ctx.get(dep) {
                    if result.success {
                        effective.insert(dep.clone(), result.output.clone());
                    }
                }
            }
            binder::apply_scope_locals(&env.ctx, &mut effective);
            Ok(effective)
        }
        CompiledPayload::Agent { .. } => {
            let mut effective = env.ctx.initial_inputs().clone();
            binder::apply_scope_locals(&env.ctx, &mut effective);
            Ok(effective)
        }
        _ => {
            let mut effective = Map::new();
            binder::apply_scope_locals(&env.ctx, &mut effective);
            Ok(effective)
        }
    }
}
