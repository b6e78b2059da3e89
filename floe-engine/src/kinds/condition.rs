//! ABOUTME: Condition node execution: evaluate, select, prune

use super::KindOutput;
use crate::convergence;
use crate::lifecycle::NodeEnv;
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{FloeError, Result};
use serde_json::json;
use tracing::debug;

pub(crate) async fn run(env: &NodeEnv) -> Result<KindOutput> {
    let CompiledPayload::Condition {
        expression,
        true_branch,
        false_branch,
    } = &env.node.payload
    else {
        return Err(FloeError::internal("condition executor on non-condition node"));
    };

    let selected = convergence::eval_bool(&env.ctx, expression, &env.node.id)?;
    let prune = if selected {
        false_branch.clone()
    } else {
        true_branch.clone()
    };
    debug!(node = %env.node.id, selected, pruned = prune.len(), "condition evaluated");

    Ok(KindOutput {
        output: json!({
            "result": selected,
            "selected_branch": if selected { "true" } else { "false" },
        }),
        tokens: 0,
        prune,
    })
}
