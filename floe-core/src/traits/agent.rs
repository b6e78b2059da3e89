//! ABOUTME: Agent capability and factory traits for plan-act loops
//! ABOUTME: Agents decide on tool calls, observe results, and finish with a message

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One step of an agent's plan→act loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decision {
    /// True when the agent is finished; `message` carries the final output.
    #[serde(default)]
    pub done: bool,
    /// Tool to invoke when not done.
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Inputs for the tool invocation.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Final (or interim) message.
    #[serde(default)]
    pub message: Option<String>,
}

impl Decision {
    pub fn finish(message: impl Into<String>) -> Self {
        Self {
            done: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn use_tool(tool_name: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            done: false,
            tool_name: Some(tool_name.into()),
            inputs,
            ..Self::default()
        }
    }
}

/// Read-only projection of the loop state handed to `decide`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    /// 1-based iteration counter.
    pub iteration: u32,
    /// Effective node inputs.
    pub inputs: Map<String, Value>,
    /// Observations accumulated from prior tool invocations, oldest first.
    pub observations: Vec<Value>,
}

/// Agent capability: an iterative decide/observe loop over allowed tools.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce the next decision given the current loop state.
    async fn decide(&self, view: &AgentView) -> Result<Decision>;

    /// Tools this agent may invoke. The engine intersects this with the
    /// node's declared `tools` whitelist when one is present.
    fn allowed_tools(&self) -> Vec<String>;

    /// Record the outcome of the decision's tool invocation.
    async fn observe(&self, view: &AgentView, result: &Value) -> Result<()>;
}

/// Factory producing fresh agent instances per node execution.
pub trait AgentFactory: Send + Sync {
    fn name(&self) -> &str;

    fn instantiate(&self, params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Agent>>;

    /// Stable content identity used for idempotent re-registration checks.
    fn fingerprint(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_constructors() {
        let done = Decision::finish("all set");
        assert!(done.done);
        assert_eq!(done.message.as_deref(), Some("all set"));
        assert!(done.tool_name.is_none());

        let act = Decision::use_tool("search", Map::new());
        assert!(!act.done);
        assert_eq!(act.tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn test_decision_deserialize_defaults() {
        let decision: Decision = serde_json::from_str("{}").unwrap();
        assert!(!decision.done);
        assert!(decision.tool_name.is_none());
        assert!(decision.inputs.is_empty());
    }
}
