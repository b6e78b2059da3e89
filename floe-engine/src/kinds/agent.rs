//! ABOUTME: Agent node execution: the iterative plan-act-observe loop
//! ABOUTME: Tool calls resolve through the registry, gated by allow-lists

use super::KindOutput;
use crate::lifecycle::NodeEnv;
use crate::runtime::EngineShared;
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{FloeError, Result};
use floe_core::registry::{ComponentKind, FactoryHandle};
use floe_core::traits::agent::AgentView;
use floe_core::traits::tool::Invocation;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) async fn run(
    env: &NodeEnv,
    effective: &Map<String, Value>,
    cancel: CancellationToken,
) -> Result<KindOutput> {
    let CompiledPayload::Agent {
        factory,
        tools,
        max_iterations,
    } = &env.node.payload
    else {
        return Err(FloeError::internal("agent executor on non-agent node"));
    };

    let (output, tokens) = run_loop(
        &env.shared,
        &env.node.id,
        factory,
        tools,
        *max_iterations,
        effective.clone(),
        &cancel,
    )
    .await?;
    Ok(KindOutput {
        output,
        tokens,
        prune: Vec::new(),
    })
}

/// The plan→act loop, shared with recursion nodes that re-enter an agent.
///
/// Each iteration asks the agent to decide; a `done` decision returns the
/// accumulated message, anything else names a tool to invoke. Exceeding the
/// iteration cap without `done` fails `AgentNonConverged`.
pub(crate) async fn run_loop(
    shared: &Arc<EngineShared>,
    node_id: &str,
    factory: &FactoryHandle,
    node_tools: &[String],
    max_iterations: u32,
    inputs: Map<String, Value>,
    cancel: &CancellationToken,
) -> Result<(Value, u64)> {
    let agent = factory.instantiate_agent(&Map::new())?;
    let allowed = agent.allowed_tools();
    let mut observations: Vec<Value> = Vec::new();

    for iteration in 1..=max_iterations {
        if cancel.is_cancelled() {
            return Err(FloeError::Cancelled {
                reason: shared.cancel_reason_text(),
            });
        }

        let view = AgentView {
            iteration,
            inputs: inputs.clone(),
            observations: observations.clone(),
        };
        let decision = agent.decide(&view).await?;

        if decision.done {
            let message = decision.message.unwrap_or_default();
            return Ok((
                json!({ "message": message, "iterations": iteration }),
                0,
            ));
        }

        let Some(tool_name) = decision.tool_name else {
            return Err(FloeError::Validation {
                message: format!("agent `{node_id}` decision is neither done nor a tool call"),
                field: None,
            });
        };
        if !allowed.iter().any(|t| t == &tool_name)
            || (!node_tools.is_empty() && !node_tools.iter().any(|t| t == &tool_name))
        {
            return Err(FloeError::Validation {
                message: format!("agent `{node_id}` may not invoke tool `{tool_name}`"),
                field: None,
            });
        }
        debug!(agent = %node_id, iteration, tool = %tool_name, "agent tool call");

        let handle = shared.registry.resolve(ComponentKind::Tool, &tool_name)?;
        let tool = handle.instantiate_tool(&Map::new())?;
        tool.input_schema().validate(&decision.inputs)?;
        let invocation = Invocation::new(shared.run_id, node_id, cancel.child_token());
        let output = tool.execute(decision.inputs.clone(), &invocation).await?;
        let observation = Value::Object(output);
        agent.observe(&view, &observation).await?;
        observations.push(observation);
    }

    Err(FloeError::AgentNonConverged { max_iterations })
}
