//! ABOUTME: Stub tools, agents, providers, sinks, estimators, and sandboxes
//! ABOUTME: Everything is deterministic and controllable from tests

use async_trait::async_trait;
use floe_core::blueprint::NodeKind;
use floe_core::error::{FloeError, Result};
use floe_core::events::{EventSink, RunEvent};
use floe_core::schema::{ValueSchema, ValueType};
use floe_core::traits::agent::{Agent, AgentFactory, AgentView, Decision};
use floe_core::traits::estimator::CostEstimator;
use floe_core::traits::provider::{Completion, LlmProvider, ProviderFactory, TokenUsage};
use floe_core::traits::sandbox::{SandboxExecutor, SandboxOutcome, SandboxRequest};
use floe_core::traits::tool::{Invocation, Tool, ToolFactory};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Echoes its `msg` input as `{text: msg}`.
pub struct EchoToolFactory;

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn input_schema(&self) -> ValueSchema {
        ValueSchema::new().with("msg", ValueType::String)
    }

    fn output_schema(&self) -> ValueSchema {
        ValueSchema::text()
    }

    async fn execute(
        &self,
        inputs: Map<String, Value>,
        _invocation: &Invocation,
    ) -> Result<Map<String, Value>> {
        let msg = inputs
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut out = Map::new();
        out.insert("text".to_string(), Value::String(msg.to_string()));
        Ok(out)
    }
}

impl ToolFactory for EchoToolFactory {
    fn name(&self) -> &str {
        "echo_tool"
    }

    fn instantiate(&self, _params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Tool>> {
        Ok(Arc::new(EchoTool))
    }

    fn fingerprint(&self) -> String {
        "echo_tool@1".to_string()
    }
}

/// Fails the first `fail_times` executions with a transient tool error,
/// then succeeds with `{attempt: n}`. The counter lives on the factory so
/// retries observe it regardless of instantiation policy.
pub struct FlakyToolFactory {
    pub name: String,
    pub fail_times: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyToolFactory {
    pub fn new(name: &str, fail_times: u32) -> Self {
        Self {
            name: name.to_string(),
            fail_times,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

struct FlakyTool {
    fail_times: u32,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Tool for FlakyTool {
    fn input_schema(&self) -> ValueSchema {
        ValueSchema::new()
    }

    fn output_schema(&self) -> ValueSchema {
        ValueSchema::new().with("attempt", ValueType::Integer)
    }

    async fn execute(
        &self,
        _inputs: Map<String, Value>,
        _invocation: &Invocation,
    ) -> Result<Map<String, Value>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            return Err(FloeError::Tool {
                message: format!("transient failure on call {call}"),
                transient: true,
            });
        }
        let mut out = Map::new();
        out.insert("attempt".to_string(), json!(call));
        Ok(out)
    }
}

impl ToolFactory for FlakyToolFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, _params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Tool>> {
        Ok(Arc::new(FlakyTool {
            fail_times: self.fail_times,
            calls: Arc::clone(&self.calls),
        }))
    }

    fn fingerprint(&self) -> String {
        format!("{}@flaky:{}", self.name, self.fail_times)
    }
}

/// Sleeps for the `ms` input (or a configured default) and returns
/// `{slept_ms: n}`. Honors cancellation.
pub struct SleepToolFactory {
    pub name: String,
    pub default_ms: u64,
}

impl SleepToolFactory {
    pub fn new(name: &str, default_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            default_ms,
        }
    }
}

struct SleepTool {
    default_ms: u64,
}

#[async_trait]
impl Tool for SleepTool {
    fn input_schema(&self) -> ValueSchema {
        ValueSchema::new()
    }

    fn output_schema(&self) -> ValueSchema {
        ValueSchema::new().with("slept_ms", ValueType::Integer)
    }

    async fn execute(
        &self,
        inputs: Map<String, Value>,
        invocation: &Invocation,
    ) -> Result<Map<String, Value>> {
        let ms = inputs
            .get("ms")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_ms);
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(ms)) => {}
            () = invocation.cancel.cancelled() => {
                return Err(FloeError::Cancelled {
                    reason: "sleep interrupted".to_string(),
                });
            }
        }
        let mut out = Map::new();
        out.insert("slept_ms".to_string(), json!(ms));
        Ok(out)
    }
}

impl ToolFactory for SleepToolFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, _params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Tool>> {
        Ok(Arc::new(SleepTool {
            default_ms: self.default_ms,
        }))
    }

    fn fingerprint(&self) -> String {
        format!("{}@sleep:{}", self.name, self.default_ms)
    }
}

/// Returns the next scripted output object on every execution, sticking to
/// the last one once the script runs out.
pub struct ScriptedToolFactory {
    pub name: String,
    outputs: Arc<Vec<Map<String, Value>>>,
    cursor: Arc<AtomicUsize>,
}

impl ScriptedToolFactory {
    pub fn new(name: &str, outputs: Vec<Value>) -> Self {
        let outputs = outputs
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap_or_default())
            .collect();
        Self {
            name: name.to_string(),
            outputs: Arc::new(outputs),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn executions(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

struct ScriptedTool {
    outputs: Arc<Vec<Map<String, Value>>>,
    cursor: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for ScriptedTool {
    fn input_schema(&self) -> ValueSchema {
        ValueSchema::new()
    }

    fn output_schema(&self) -> ValueSchema {
        ValueSchema::new()
    }

    async fn execute(
        &self,
        _inputs: Map<String, Value>,
        _invocation: &Invocation,
    ) -> Result<Map<String, Value>> {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        let clamped = i.min(self.outputs.len().saturating_sub(1));
        self.outputs
            .get(clamped)
            .cloned()
            .ok_or_else(|| FloeError::Tool {
                message: "scripted tool has no outputs".to_string(),
                transient: false,
            })
    }
}

impl ToolFactory for ScriptedToolFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, _params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Tool>> {
        Ok(Arc::new(ScriptedTool {
            outputs: Arc::clone(&self.outputs),
            cursor: Arc::clone(&self.cursor),
        }))
    }

    fn fingerprint(&self) -> String {
        format!("{}@scripted:{}", self.name, self.outputs.len())
    }
}

/// Always fails, with a configurable transient flag.
pub struct FailingToolFactory {
    pub name: String,
    pub transient: bool,
}

struct FailingTool {
    transient: bool,
}

#[async_trait]
impl Tool for FailingTool {
    fn input_schema(&self) -> ValueSchema {
        ValueSchema::new()
    }

    fn output_schema(&self) -> ValueSchema {
        ValueSchema::new()
    }

    async fn execute(
        &self,
        _inputs: Map<String, Value>,
        _invocation: &Invocation,
    ) -> Result<Map<String, Value>> {
        Err(FloeError::Tool {
            message: "structured failure".to_string(),
            transient: self.transient,
        })
    }
}

impl ToolFactory for FailingToolFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, _params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Tool>> {
        Ok(Arc::new(FailingTool {
            transient: self.transient,
        }))
    }

    fn fingerprint(&self) -> String {
        format!("{}@failing:{}", self.name, self.transient)
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Returns the rendered prompt back as the completion text.
pub struct EchoProviderFactory {
    pub model: String,
}

impl EchoProviderFactory {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

struct EchoProvider {
    model: String,
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, _config: &Map<String, Value>) -> Result<Completion> {
        Ok(Completion {
            text: prompt.to_string(),
            usage: TokenUsage {
                prompt_tokens: prompt.split_whitespace().count() as u64,
                completion_tokens: prompt.split_whitespace().count() as u64,
            },
        })
    }
}

impl ProviderFactory for EchoProviderFactory {
    fn model(&self) -> &str {
        &self.model
    }

    fn instantiate(&self) -> anyhow::Result<Arc<dyn LlmProvider>> {
        Ok(Arc::new(EchoProvider {
            model: self.model.clone(),
        }))
    }

    fn fingerprint(&self) -> String {
        format!("{}@echo", self.model)
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Plays back a fixed list of decisions, one per iteration.
pub struct ScriptedAgentFactory {
    pub name: String,
    decisions: Arc<Vec<Decision>>,
    observations: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedAgentFactory {
    pub fn new(name: &str, decisions: Vec<Decision>) -> Self {
        Self {
            name: name.to_string(),
            decisions: Arc::new(decisions),
            observations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn observations(&self) -> Vec<Value> {
        self.observations.lock().clone()
    }
}

struct ScriptedAgent {
    decisions: Arc<Vec<Decision>>,
    observations: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn decide(&self, view: &AgentView) -> Result<Decision> {
        let i = (view.iteration as usize).saturating_sub(1);
        self.decisions
            .get(i)
            .cloned()
            .ok_or(FloeError::AgentNonConverged {
                max_iterations: view.iteration,
            })
    }

    fn allowed_tools(&self) -> Vec<String> {
        vec!["echo_tool".to_string(), "sleep_tool".to_string()]
    }

    async fn observe(&self, _view: &AgentView, result: &Value) -> Result<()> {
        self.observations.lock().push(result.clone());
        Ok(())
    }
}

impl AgentFactory for ScriptedAgentFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, _params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Agent>> {
        Ok(Arc::new(ScriptedAgent {
            decisions: Arc::clone(&self.decisions),
            observations: Arc::clone(&self.observations),
        }))
    }

    fn fingerprint(&self) -> String {
        format!("{}@scripted:{}", self.name, self.decisions.len())
    }
}

// ---------------------------------------------------------------------------
// Estimators, sinks, sandboxes
// ---------------------------------------------------------------------------

/// Fixed per-kind pricing; unlisted kinds cost nothing.
#[derive(Debug, Default)]
pub struct FixedCostEstimator {
    per_kind: HashMap<NodeKind, f64>,
}

impl FixedCostEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: NodeKind, cost_usd: f64) -> Self {
        self.per_kind.insert(kind, cost_usd);
        self
    }

    pub fn llm(cost_usd: f64) -> Self {
        Self::new().with_kind(NodeKind::Llm, cost_usd)
    }
}

impl CostEstimator for FixedCostEstimator {
    fn estimate(&self, kind: NodeKind, _node_id: &str, _inputs: &Map<String, Value>) -> f64 {
        self.per_kind.get(&kind).copied().unwrap_or(0.0)
    }
}

/// Collects every emitted event for later assertions.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    /// Event types observed for the given node, in emission order.
    pub fn node_event_types(&self, node_id: &str) -> Vec<floe_core::events::EventType> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.node_id.as_deref() == Some(node_id))
            .map(|e| e.event_type)
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &RunEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Sandbox that pretends to run code and echoes the inputs back.
#[derive(Debug, Default)]
pub struct EchoSandbox;

#[async_trait]
impl SandboxExecutor for EchoSandbox {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxOutcome> {
        Ok(SandboxOutcome {
            ok: true,
            output: json!({
                "language": request.language,
                "inputs": Value::Object(request.inputs),
            }),
            logs: vec![format!("evaluated {} bytes", request.source.len())],
            error: None,
        })
    }
}
