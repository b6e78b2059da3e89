//! ABOUTME: LLM node execution: rendered prompt in, parsed completion out

use super::KindOutput;
use crate::lifecycle::NodeEnv;
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{FloeError, Result};
use floe_core::schema::ValueType;
use serde_json::{json, Map, Value};

pub(crate) async fn run(env: &NodeEnv, effective: &Map<String, Value>) -> Result<KindOutput> {
    let CompiledPayload::Llm {
        provider, config, ..
    } = &env.node.payload
    else {
        return Err(FloeError::internal("llm executor on non-llm node"));
    };

    let prompt = effective
        .get("prompt")
        .and_then(Value::as_str)
        .ok_or_else(|| FloeError::internal("rendered prompt missing from effective inputs"))?;

    let instance = provider.instantiate_provider()?;
    let completion = instance.generate(prompt, config).await?;
    let tokens = completion.usage.total();
    let output = parse_completion(env, completion.text)?;

    Ok(KindOutput {
        output,
        tokens,
        prune: Vec::new(),
    })
}

/// Shape the completion per the node's output schema. The default schema is
/// `{text: string}`; anything richer means the completion text must itself
/// be a JSON object.
fn parse_completion(env: &NodeEnv, text: String) -> Result<Value> {
    let text_only = env.node.output_schema.as_ref().map_or(true, |schema| {
        schema.len() == 1 && schema.get("text") == Some(ValueType::String)
    });
    if text_only {
        return Ok(json!({ "text": text }));
    }
    serde_json::from_str::<Map<String, Value>>(&text)
        .map(Value::Object)
        .map_err(|e| FloeError::Validation {
            message: format!(
                "completion for `{}` is not a JSON object matching its schema: {e}",
                env.node.id
            ),
            field: None,
        })
}
