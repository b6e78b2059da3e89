//! ABOUTME: Level-by-level plan scheduler with bounded parallelism
//! ABOUTME: Handles skip propagation, fail policies, and sibling cancellation

use crate::context::RunContext;
use crate::lifecycle::{execute_node, ExecOutcome, NodeEnv};
use crate::runtime::{EngineShared, FailPolicy};
use floe_compiler::plan::Plan;
use floe_core::blueprint::NodeKind;
use floe_core::error::ErrorKind;
use floe_core::events::RunEvent;
use floe_core::result::TerminatedReason;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Terminal state of one plan traversal (top-level run or nested).
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlanOutcome {
    pub success: bool,
    pub terminated: TerminatedReason,
}

/// Walk the plan level by level. Nodes within a level run concurrently up
/// to the run-global parallelism cap; a level completes when every node in
/// it is terminal. Nested workflow runs re-enter here with their own plan
/// and context but share the budget, emitter, and semaphore.
pub(crate) async fn drive_plan(
    shared: Arc<EngineShared>,
    plan: Arc<Plan>,
    ctx: Arc<RunContext>,
) -> PlanOutcome {
    // Sibling cancellation on halt stays scoped to this plan; external
    // cancellation of the whole run propagates through the parent token.
    let plan_cancel = shared.cancel.child_token();
    let mut blocked: HashSet<String> = HashSet::new();
    let mut success = true;
    let mut terminated = TerminatedReason::Completed;
    let mut halted = false;

    'levels: for level in &plan.levels {
        if shared.cancel.is_cancelled() {
            success = false;
            terminated = TerminatedReason::Cancelled;
            break 'levels;
        }

        let mut join: JoinSet<ExecOutcome> = JoinSet::new();
        for id in level {
            let Some(node) = plan.node(id) else {
                continue;
            };
            if blocked.contains(id) || node.dependencies.iter().any(|d| blocked.contains(d)) {
                blocked.insert(id.clone());
                debug!(node = %id, "skipping node with blocked upstream");
                shared.emitter.emit(RunEvent::node_skipped(
                    shared.run_id,
                    id,
                    "upstream skipped, pruned, or failed",
                ));
                continue;
            }

            let env = NodeEnv {
                shared: Arc::clone(&shared),
                plan: Arc::clone(&plan),
                ctx: Arc::clone(&ctx),
                node: Arc::clone(node),
                cancel: plan_cancel.clone(),
            };
            let semaphore = Arc::clone(&shared.semaphore);
            join.spawn(async move {
                let permit = semaphore.acquire_owned().await;
                // Container kinds orchestrate sub-executions (nested plans
                // re-enter this scheduler and acquire from the same
                // semaphore); holding a slot across that would deadlock at
                // low parallelism. Leaf kinds keep the slot for the whole
                // execution.
                let _permit = match env.node.kind {
                    NodeKind::Workflow
                    | NodeKind::Recursive
                    | NodeKind::Loop
                    | NodeKind::Parallel => {
                        drop(permit);
                        None
                    }
                    _ => permit.ok(),
                };
                execute_node(env).await
            });
        }

        while let Some(joined) = join.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    error!(%join_error, "node task aborted");
                    shared.record_error(ErrorKind::Internal, join_error.to_string());
                    success = false;
                    if terminated == TerminatedReason::Completed {
                        terminated = TerminatedReason::Failed;
                    }
                    continue;
                }
            };

            for pruned in &outcome.prune {
                blocked.insert(pruned.clone());
            }

            if outcome.result.success {
                continue;
            }

            let kind = outcome.result.error_kind.unwrap_or(ErrorKind::Internal);
            if kind != ErrorKind::Cancelled {
                shared.record_error(
                    kind,
                    outcome.result.error_message.clone().unwrap_or_default(),
                );
            }
            success = false;
            if terminated == TerminatedReason::Completed {
                terminated = match kind {
                    ErrorKind::Budget => TerminatedReason::BudgetExceeded,
                    ErrorKind::Cancelled => TerminatedReason::Cancelled,
                    _ => TerminatedReason::Failed,
                };
            }
            match shared.options.fail_policy {
                FailPolicy::Halt => {
                    plan_cancel.cancel();
                    halted = true;
                }
                FailPolicy::ContinuePossible => {
                    blocked.insert(outcome.id.clone());
                }
                FailPolicy::Always => {}
            }
        }

        if halted {
            break 'levels;
        }
    }

    PlanOutcome {
        success,
        terminated,
    }
}
