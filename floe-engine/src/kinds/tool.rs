//! ABOUTME: Tool node execution: instantiate, validate, invoke

use super::KindOutput;
use crate::lifecycle::NodeEnv;
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{FloeError, Result};
use floe_core::traits::tool::Invocation;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub(crate) async fn run(
    env: &NodeEnv,
    effective: &Map<String, Value>,
    cancel: CancellationToken,
) -> Result<KindOutput> {
    let CompiledPayload::Tool {
        factory,
        literal_args,
        ..
    } = &env.node.payload
    else {
        return Err(FloeError::internal("tool executor on non-tool node"));
    };

    let tool = factory.instantiate_tool(literal_args)?;
    tool.input_schema().validate(effective)?;

    let invocation = Invocation::new(env.shared.run_id, env.node.id.clone(), cancel);
    let output = tool.execute(effective.clone(), &invocation).await?;
    Ok(KindOutput::value(Value::Object(output)))
}
