//! ABOUTME: Blueprint document model with strict per-kind node payloads
//! ABOUTME: Provides NodeSpec, RetryPolicy, ResourceLimits, and content identity

use crate::error::ErrorKind;
use crate::schema::ValueSchema;
use crate::types::BlueprintId;
use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;

/// Blueprint schema version this crate reads and writes.
pub const SCHEMA_VERSION: &str = "1.0";

/// Default per-node execution timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Immutable declarative description of a workflow graph.
///
/// A blueprint's identity is the truncated SHA-256 of its normalized JSON;
/// normalization means key-sorted object serialization, which `serde_json`'s
/// default `BTreeMap`-backed maps provide. Deserialize-then-serialize is the
/// normalization step.
///
/// # Examples
///
/// ```
/// use floe_core::Blueprint;
///
/// let json = r#"{
///     "schema_version": "1.0",
///     "nodes": [
///         {"id": "n1", "kind": "tool", "tool_name": "echo", "tool_args": {"msg": "hi"}}
///     ]
/// }"#;
/// let blueprint: Blueprint = serde_json::from_str(json).unwrap();
/// assert_eq!(blueprint.id(), blueprint.id());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Blueprint {
    pub schema_version: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Blueprint {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            nodes,
            metadata: Map::new(),
        }
    }

    /// Content-addressed identity over the normalized JSON form.
    pub fn id(&self) -> BlueprintId {
        let normalized =
            serde_json::to_string(self).expect("blueprint serialization is infallible");
        BlueprintId::from_content(normalized.as_bytes())
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }
}

/// The nine node kinds a blueprint may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Tool,
    Llm,
    Agent,
    Condition,
    Loop,
    Parallel,
    Workflow,
    Recursive,
    Code,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Llm => "llm",
            Self::Agent => "agent",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::Workflow => "workflow",
            Self::Recursive => "recursive",
            Self::Code => "code",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single node declaration within a blueprint.
///
/// The JSON surface is flat: the kind tag and its payload fields sit next to
/// the common fields. Unknown fields anywhere are rejected. serde cannot
/// combine `flatten` with `deny_unknown_fields`, so (de)serialization is
/// written by hand: common fields are split off first and the remainder must
/// deserialize exactly into the kind's payload struct.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub payload: NodePayload,
    pub dependencies: Vec<String>,
    pub input_schema: Option<ValueSchema>,
    pub output_schema: Option<ValueSchema>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    pub metadata: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            id: id.into(),
            payload,
            dependencies: Vec::new(),
            input_schema: None,
            output_schema: None,
            retry_policy: None,
            timeout_ms: None,
            metadata: Map::new(),
        }
    }

    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_input_schema(mut self, schema: ValueSchema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: ValueSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }
}

/// Kind-specific payload, one variant per node kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePayload {
    Tool(ToolSpec),
    Llm(LlmSpec),
    Agent(AgentSpec),
    Condition(ConditionSpec),
    Loop(LoopSpec),
    Parallel(ParallelSpec),
    Workflow(WorkflowSpec),
    Recursive(RecursiveSpec),
    Code(CodeSpec),
}

impl NodePayload {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Tool(_) => NodeKind::Tool,
            Self::Llm(_) => NodeKind::Llm,
            Self::Agent(_) => NodeKind::Agent,
            Self::Condition(_) => NodeKind::Condition,
            Self::Loop(_) => NodeKind::Loop,
            Self::Parallel(_) => NodeKind::Parallel,
            Self::Workflow(_) => NodeKind::Workflow,
            Self::Recursive(_) => NodeKind::Recursive,
            Self::Code(_) => NodeKind::Code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSpec {
    pub model: String,
    pub prompt_template: String,
    #[serde(default)]
    pub llm_config: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub agent_name: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_agent_iterations")]
    pub max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionSpec {
    pub expression: String,
    #[serde(default)]
    pub true_branch: Vec<String>,
    #[serde(default)]
    pub false_branch: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopSpec {
    pub items_source: String,
    pub body_nodes: Vec<String>,
    #[serde(default = "default_loop_iterations")]
    pub max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelSpec {
    pub branches: Vec<Vec<String>>,
    #[serde(default = "default_parallel_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSpec {
    pub workflow_ref: String,
    #[serde(default)]
    pub config_overrides: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecursiveSpec {
    pub agent_or_workflow_ref: String,
    pub recursive_sources: Vec<String>,
    pub convergence_condition: String,
    #[serde(default = "default_recursive_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub preserve_context: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeSpec {
    pub source: String,
    #[serde(default)]
    pub allowed_imports: Vec<String>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

fn default_agent_iterations() -> u32 {
    10
}

fn default_loop_iterations() -> u32 {
    100
}

fn default_parallel_concurrency() -> usize {
    4
}

fn default_recursive_iterations() -> u32 {
    5
}

/// Retry policy attached to a node, with spec defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_base_ms: 100,
            backoff_factor: 2.0,
            retry_on: vec![ErrorKind::Timeout, ErrorKind::LlmProvider],
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after the given failed attempt (1-based):
    /// `backoff_base_ms * backoff_factor^(attempt-1)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff_factor.max(0.0).powi(exponent as i32);
        let millis = (self.backoff_base_ms as f64 * factor).round();
        Duration::from_millis(millis.clamp(0.0, u64::MAX as f64) as u64)
    }

    pub fn retries(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }
}

/// Sandbox resource limits for `code` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ResourceLimits {
    pub cpu_ms: u64,
    pub memory_bytes: u64,
    pub wall_ms: u64,
    pub network: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_ms: 5_000,
            memory_bytes: 256 * 1024 * 1024,
            wall_ms: 30_000,
            network: false,
        }
    }
}

impl Serialize for NodeSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let payload = match &self.payload {
            NodePayload::Tool(spec) => serde_json::to_value(spec),
            NodePayload::Llm(spec) => serde_json::to_value(spec),
            NodePayload::Agent(spec) => serde_json::to_value(spec),
            NodePayload::Condition(spec) => serde_json::to_value(spec),
            NodePayload::Loop(spec) => serde_json::to_value(spec),
            NodePayload::Parallel(spec) => serde_json::to_value(spec),
            NodePayload::Workflow(spec) => serde_json::to_value(spec),
            NodePayload::Recursive(spec) => serde_json::to_value(spec),
            NodePayload::Code(spec) => serde_json::to_value(spec),
        }
        .map_err(S::Error::custom)?;

        let mut object = match payload {
            Value::Object(map) => map,
            other => return Err(S::Error::custom(format!("payload must be an object, got {other}"))),
        };

        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert(
            "kind".to_string(),
            Value::String(self.kind().as_str().to_string()),
        );
        object.insert(
            "dependencies".to_string(),
            serde_json::to_value(&self.dependencies).map_err(S::Error::custom)?,
        );
        if let Some(schema) = &self.input_schema {
            object.insert(
                "input_schema".to_string(),
                serde_json::to_value(schema).map_err(S::Error::custom)?,
            );
        }
        if let Some(schema) = &self.output_schema {
            object.insert(
                "output_schema".to_string(),
                serde_json::to_value(schema).map_err(S::Error::custom)?,
            );
        }
        if let Some(policy) = &self.retry_policy {
            object.insert(
                "retry_policy".to_string(),
                serde_json::to_value(policy).map_err(S::Error::custom)?,
            );
        }
        if let Some(timeout_ms) = self.timeout_ms {
            object.insert("timeout_ms".to_string(), Value::from(timeout_ms));
        }
        if !self.metadata.is_empty() {
            object.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        }

        object.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut object = Map::<String, Value>::deserialize(deserializer)?;

        let id = match object.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(_) => return Err(D::Error::custom("node `id` must be a non-empty string")),
            None => return Err(D::Error::missing_field("id")),
        };
        let kind: NodeKind = match object.remove("kind") {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| D::Error::custom(format!("node `{id}`: invalid kind: {e}")))?,
            None => return Err(D::Error::missing_field("kind")),
        };

        let dependencies = take_field(&mut object, "dependencies", &id)?.unwrap_or_default();
        let input_schema = take_field(&mut object, "input_schema", &id)?;
        let output_schema = take_field(&mut object, "output_schema", &id)?;
        let retry_policy = take_field(&mut object, "retry_policy", &id)?;
        let timeout_ms = take_field(&mut object, "timeout_ms", &id)?;
        let metadata: Option<Map<String, Value>> = take_field(&mut object, "metadata", &id)?;

        // Whatever remains is the kind payload; the payload structs reject
        // unknown fields, which makes the whole node surface strict.
        let rest = Value::Object(object);
        let payload = deserialize_payload(kind, rest)
            .map_err(|e| D::Error::custom(format!("node `{id}` ({kind}): {e}")))?;

        Ok(Self {
            id,
            payload,
            dependencies,
            input_schema,
            output_schema,
            retry_policy,
            timeout_ms,
            metadata: metadata.unwrap_or_default(),
        })
    }
}

fn take_field<T: serde::de::DeserializeOwned, E: DeError>(
    object: &mut Map<String, Value>,
    field: &str,
    node_id: &str,
) -> std::result::Result<Option<T>, E> {
    match object.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| E::custom(format!("node `{node_id}` field `{field}`: {e}"))),
    }
}

fn deserialize_payload(kind: NodeKind, rest: Value) -> serde_json::Result<NodePayload> {
    Ok(match kind {
        NodeKind::Tool => NodePayload::Tool(serde_json::from_value(rest)?),
        NodeKind::Llm => NodePayload::Llm(serde_json::from_value(rest)?),
        NodeKind::Agent => NodePayload::Agent(serde_json::from_value(rest)?),
        NodeKind::Condition => NodePayload::Condition(serde_json::from_value(rest)?),
        NodeKind::Loop => NodePayload::Loop(serde_json::from_value(rest)?),
        NodeKind::Parallel => NodePayload::Parallel(serde_json::from_value(rest)?),
        NodeKind::Workflow => NodePayload::Workflow(serde_json::from_value(rest)?),
        NodeKind::Recursive => NodePayload::Recursive(serde_json::from_value(rest)?),
        NodeKind::Code => NodePayload::Code(serde_json::from_value(rest)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_node(id: &str) -> Value {
        json!({
            "id": id,
            "kind": "tool",
            "tool_name": "echo",
            "tool_args": {"msg": "hello"}
        })
    }

    #[test]
    fn test_roundtrip_preserves_content() {
        let json = json!({
            "schema_version": "1.0",
            "nodes": [
                tool_node("n1"),
                {
                    "id": "n2",
                    "kind": "llm",
                    "model": "stub",
                    "prompt_template": "say: ${n1.text}",
                    "dependencies": ["n1"],
                    "timeout_ms": 5000
                }
            ]
        });
        let blueprint: Blueprint = serde_json::from_value(json).unwrap();
        let serialized = serde_json::to_value(&blueprint).unwrap();
        let back: Blueprint = serde_json::from_value(serialized).unwrap();
        assert_eq!(blueprint, back);
    }

    #[test]
    fn test_identity_stable_and_content_sensitive() {
        let a: Blueprint =
            serde_json::from_value(json!({"schema_version": "1.0", "nodes": [tool_node("n1")]}))
                .unwrap();
        let b: Blueprint =
            serde_json::from_value(json!({"schema_version": "1.0", "nodes": [tool_node("n1")]}))
                .unwrap();
        let c: Blueprint =
            serde_json::from_value(json!({"schema_version": "1.0", "nodes": [tool_node("n2")]}))
                .unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_unknown_payload_field_rejected() {
        let json = json!({
            "id": "n1",
            "kind": "tool",
            "tool_name": "echo",
            "surprise": true
        });
        let err = serde_json::from_value::<NodeSpec>(json).unwrap_err();
        assert!(err.to_string().contains("surprise"), "got: {err}");
    }

    #[test]
    fn test_unknown_blueprint_field_rejected() {
        let json = json!({
            "schema_version": "1.0",
            "nodes": [],
            "extra_top_level": 1
        });
        assert!(serde_json::from_value::<Blueprint>(json).is_err());
    }

    #[test]
    fn test_missing_required_payload_field() {
        let json = json!({"id": "n1", "kind": "llm", "model": "stub"});
        let err = serde_json::from_value::<NodeSpec>(json).unwrap_err();
        assert!(err.to_string().contains("prompt_template"), "got: {err}");
    }

    #[test]
    fn test_payload_defaults_applied() {
        let json = json!({
            "id": "r1",
            "kind": "recursive",
            "agent_or_workflow_ref": "improver",
            "recursive_sources": ["n_propose"],
            "convergence_condition": "${accumulator.score} >= 0.8",
            "dependencies": ["n_propose"]
        });
        let node: NodeSpec = serde_json::from_value(json).unwrap();
        match &node.payload {
            NodePayload::Recursive(spec) => {
                assert_eq!(spec.max_iterations, 5);
                assert!(!spec.preserve_context);
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_base_ms, 100);
        assert!((policy.backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(
            policy.retry_on,
            vec![ErrorKind::Timeout, ErrorKind::LlmProvider]
        );
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_factor: 2.0,
            retry_on: vec![ErrorKind::Tool],
        };
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(40));
    }

    #[test]
    fn test_resource_limits_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_ms, 5_000);
        assert_eq!(limits.wall_ms, 30_000);
        assert!(!limits.network);
    }

    #[test]
    fn test_node_builder() {
        let node = NodeSpec::new(
            "n1",
            NodePayload::Tool(ToolSpec {
                tool_name: "echo".to_string(),
                tool_args: Map::new(),
            }),
        )
        .with_dependency("n0")
        .with_timeout_ms(1_000);
        assert_eq!(node.kind(), NodeKind::Tool);
        assert_eq!(node.dependencies, vec!["n0"]);
        assert_eq!(node.timeout_ms, Some(1_000));
    }
}
