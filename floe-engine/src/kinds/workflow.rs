//! ABOUTME: Nested workflow node execution against a pre-compiled sub-plan
//! ABOUTME: Shares the parent run's event sink, budget, and parallelism cap

use super::KindOutput;
use crate::context::RunContext;
use crate::lifecycle::NodeEnv;
use crate::scheduler::drive_plan;
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{ErrorKind, FloeError, Result};
use floe_core::result::TerminatedReason;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub(crate) async fn run(env: &NodeEnv, effective: &Map<String, Value>) -> Result<KindOutput> {
    let CompiledPayload::Workflow {
        plan: sub_plan,
        config_overrides,
    } = &env.node.payload
    else {
        return Err(FloeError::internal("workflow executor on non-workflow node"));
    };

    // Bound inputs win over config overrides, which win over the sub-plan's
    // own defaults.
    let mut inputs = config_overrides.clone();
    for (key, value) in effective {
        inputs.insert(key.clone(), value.clone());
    }

    debug!(node = %env.node.id, sub_blueprint = %sub_plan.blueprint_id, "entering nested run");
    let sub_ctx = RunContext::root(inputs);
    let outcome = drive_plan(
        Arc::clone(&env.shared),
        Arc::clone(sub_plan),
        Arc::clone(&sub_ctx),
    )
    .await;

    if outcome.success {
        let mut output = Map::new();
        for id in &sub_plan.terminal_level_ids {
            if let Some(result) = sub_ctx.get(id) {
                output.insert(id.clone(), result.output.clone());
            }
        }
        return Ok(KindOutput::value(Value::Object(output)));
    }

    let (kind, message) = env
        .shared
        .first_error
        .lock()
        .clone()
        .unwrap_or((ErrorKind::Internal, "nested run failed".to_string()));
    let kind = match outcome.terminated {
        TerminatedReason::BudgetExceeded => ErrorKind::Budget,
        TerminatedReason::Cancelled => ErrorKind::Cancelled,
        _ => kind,
    };
    Err(FloeError::Nested { kind, message })
}
