//! ABOUTME: Kind-specific node execution, one module per node kind
//! ABOUTME: Dispatched by the lifecycle after bind/validate/preflight

pub(crate) mod agent;
pub(crate) mod code;
pub(crate) mod condition;
pub(crate) mod llm;
pub(crate) mod loops;
pub(crate) mod parallel;
pub(crate) mod recursive;
pub(crate) mod tool;
pub(crate) mod workflow;

use crate::lifecycle::NodeEnv;
use floe_compiler::plan::CompiledPayload;
use floe_core::error::Result;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// What a kind executor produces for one attempt.
pub(crate) struct KindOutput {
    pub output: Value,
    pub tokens: u64,
    /// Node ids to prune (condition branches).
    pub prune: Vec<String>,
}

impl KindOutput {
    pub fn value(output: Value) -> Self {
        Self {
            output,
            tokens: 0,
            prune: Vec::new(),
        }
    }
}

/// Execute the node's kind-specific action. `cancel` is the node-scoped
/// token: cancelled by the timeout timer, the plan halt, or the run cancel.
pub(crate) async fn run_kind(
    env: &NodeEnv,
    effective: &Map<String, Value>,
    cancel: CancellationToken,
) -> Result<KindOutput> {
    match &env.node.payload {
        CompiledPayload::Tool { .. } => tool::run(env, effective, cancel).await,
        CompiledPayload::Llm { .. } => llm::run(env, effective).await,
        CompiledPayload::Agent { .. } => agent::run(env, effective, cancel).await,
        CompiledPayload::Condition { .. } => condition::run(env).await,
        CompiledPayload::Loop { .. } => loops::run(env, cancel).await,
        CompiledPayload::Parallel { .. } => parallel::run(env, cancel).await,
        CompiledPayload::Workflow { .. } => workflow::run(env, effective).await,
        CompiledPayload::Recursive { .. } => recursive::run(env, cancel).await,
        CompiledPayload::Code { .. } => code::run(env, effective).await,
    }
}
