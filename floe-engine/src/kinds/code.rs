//! ABOUTME: Code node execution: delegate to the sandbox seam, nothing else

use super::KindOutput;
use crate::lifecycle::NodeEnv;
use floe_compiler::plan::CompiledPayload;
use floe_core::error::{FloeError, Result};
use floe_core::traits::sandbox::SandboxRequest;
use serde_json::{Map, Value};

pub(crate) async fn run(env: &NodeEnv, effective: &Map<String, Value>) -> Result<KindOutput> {
    let CompiledPayload::Code {
        source,
        language,
        allowed_imports,
        limits,
    } = &env.node.payload
    else {
        return Err(FloeError::internal("code executor on non-code node"));
    };

    let Some(sandbox) = env.shared.sandbox.clone() else {
        return Err(FloeError::Sandbox {
            message: "no sandbox executor configured".to_string(),
        });
    };

    let request = SandboxRequest {
        source: source.clone(),
        language: language.clone(),
        allowed_imports: allowed_imports.clone(),
        resource_limits: limits.clone(),
        inputs: effective.clone(),
    };
    let outcome = sandbox.execute(request).await?;
    if outcome.ok {
        Ok(KindOutput::value(outcome.output))
    } else {
        Err(FloeError::Sandbox {
            message: outcome
                .error
                .unwrap_or_else(|| "sandbox execution failed".to_string()),
        })
    }
}
