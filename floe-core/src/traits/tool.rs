//! ABOUTME: Tool capability and factory traits
//! ABOUTME: Tools expose declared schemas and a single execute entry point

use crate::error::Result;
use crate::schema::ValueSchema;
use crate::types::RunId;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-invocation context handed to tools and agents.
///
/// Carries the run/node identity and the cooperative cancellation signal.
/// Components are expected to poll or select on `cancel` at their own I/O
/// boundaries; the engine abandons tasks that ignore it past the grace
/// window.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub run_id: RunId,
    pub node_id: String,
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn new(run_id: RunId, node_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Tool capability: `execute(inputs) → outputs` plus declared schemas.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declared input schema.
    fn input_schema(&self) -> ValueSchema;

    /// Declared output schema.
    fn output_schema(&self) -> ValueSchema;

    /// Run the tool against already-validated inputs.
    async fn execute(
        &self,
        inputs: Map<String, Value>,
        invocation: &Invocation,
    ) -> Result<Map<String, Value>>;
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Tool").finish_non_exhaustive()
    }
}

/// Factory producing fresh tool instances per node execution.
///
/// Instances are owned by the engine for the duration of a single node
/// execution and discarded at completion; factories must not pool.
pub trait ToolFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Construct an instance. Errors are wrapped as `Factory` failures by
    /// the registry.
    fn instantiate(&self, params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Tool>>;

    /// Stable content identity (typically name plus version) used for
    /// idempotent re-registration checks.
    fn fingerprint(&self) -> String;
}
