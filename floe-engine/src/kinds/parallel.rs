//! ABOUTME: Parallel node execution: branch subgraphs under a concurrency cap
//! ABOUTME: Aggregates branch outputs in branch-declaration order

use super::KindOutput;
use crate::lifecycle::{execute_node, NodeEnv};
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{ErrorKind, FloeError, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type BranchResult = (usize, std::result::Result<Value, (ErrorKind, String)>);

pub(crate) async fn run(env: &NodeEnv, cancel: CancellationToken) -> Result<KindOutput> {
    let CompiledPayload::Parallel {
        branches,
        max_concurrency,
    } = &env.node.payload
    else {
        return Err(FloeError::internal("parallel executor on non-parallel node"));
    };

    let limiter = Arc::new(Semaphore::new((*max_concurrency).max(1)));
    let mut join: JoinSet<BranchResult> = JoinSet::new();

    for (branch_index, branch) in branches.iter().enumerate() {
        let branch_ids = branch.clone();
        let scope = env.ctx.child(Map::new());
        let shared = Arc::clone(&env.shared);
        let plan = Arc::clone(&env.plan);
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();

        join.spawn(async move {
            let _permit = limiter.acquire_owned().await;
            let mut last = Value::Null;
            for body_id in &branch_ids {
                let Some(body_node) = plan.node(body_id) else {
                    return (
                        branch_index,
                        Err((
                            ErrorKind::Internal,
                            format!("branch node `{body_id}` missing from plan"),
                        )),
                    );
                };
                let outcome = execute_node(NodeEnv {
                    shared: Arc::clone(&shared),
                    plan: Arc::clone(&plan),
                    ctx: Arc::clone(&scope),
                    node: Arc::clone(body_node),
                    cancel: cancel.clone(),
                })
                .await;
                if !outcome.result.success {
                    return (
                        branch_index,
                        Err((
                            outcome.result.error_kind.unwrap_or(ErrorKind::Internal),
                            format!(
                                "branch {branch_index} node `{body_id}` failed: {}",
                                outcome.result.error_message.unwrap_or_default()
                            ),
                        )),
                    );
                }
                last = outcome.result.output;
            }
            (branch_index, Ok(last))
        });
    }

    let mut results: Vec<Option<Value>> = vec![None; branches.len()];
    let mut first_failure: Option<(usize, ErrorKind, String)> = None;
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok((index, Ok(value))) => results[index] = Some(value),
            Ok((index, Err((kind, message)))) => {
                let replace = first_failure
                    .as_ref()
                    .map_or(true, |(existing, _, _)| index < *existing);
                if replace {
                    first_failure = Some((index, kind, message));
                }
            }
            Err(join_error) => {
                return Err(FloeError::internal(format!(
                    "branch task aborted: {join_error}"
                )));
            }
        }
    }

    if let Some((_, kind, message)) = first_failure {
        return Err(FloeError::Nested { kind, message });
    }

    let outputs: Vec<Value> = results.into_iter().map(Option::unwrap_or_default).collect();
    Ok(KindOutput::value(json!({
        "branches": outputs,
        "count": branches.len(),
    })))
}
