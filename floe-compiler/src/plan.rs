//! ABOUTME: Compiled plan types: the executable form of a blueprint
//! ABOUTME: PlanNodes carry resolved factories, compiled bindings, and policies

use crate::expr::Expr;
use crate::template::TemplateString;
use floe_core::blueprint::{NodeKind, ResourceLimits, RetryPolicy};
use floe_core::registry::FactoryHandle;
use floe_core::schema::ValueSchema;
use floe_core::types::BlueprintId;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Snapshot of the retry/timeout policy applied to a node, with defaults
/// already folded in.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub retry: RetryPolicy,
    pub timeout_ms: u64,
}

/// One step into a JSON argument object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    Key(String),
    Index(usize),
}

/// A compiled template binding: where in the argument object the rendered
/// value lands, and the template that produces it.
#[derive(Debug, Clone)]
pub struct Binding {
    pub target: Vec<BindTarget>,
    pub template: TemplateString,
}

impl Binding {
    /// Dotted display form of the target, for diagnostics.
    pub fn target_path(&self) -> String {
        let mut out = String::new();
        for step in &self.target {
            match step {
                BindTarget::Key(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                BindTarget::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

/// What a recursion node re-enters when its declared sources are empty.
#[derive(Debug, Clone)]
pub enum RecursiveTarget {
    Agent(FactoryHandle),
    Workflow(Arc<Plan>),
}

/// Kind-specific compiled payload.
#[derive(Debug, Clone)]
pub enum CompiledPayload {
    Tool {
        factory: FactoryHandle,
        /// Declarative arguments as authored, template strings included.
        literal_args: Map<String, Value>,
        /// Compiled bindings overwriting positions inside `literal_args`.
        bindings: Vec<Binding>,
    },
    Llm {
        provider: FactoryHandle,
        model: String,
        prompt: TemplateString,
        config: Map<String, Value>,
    },
    Agent {
        factory: FactoryHandle,
        tools: Vec<String>,
        max_iterations: u32,
    },
    Condition {
        expression: Expr,
        true_branch: Vec<String>,
        false_branch: Vec<String>,
    },
    Loop {
        items_source: TemplateString,
        /// Body nodes in topological execution order.
        body_order: Vec<String>,
        max_iterations: u32,
    },
    Parallel {
        branches: Vec<Vec<String>>,
        max_concurrency: usize,
    },
    Workflow {
        plan: Arc<Plan>,
        config_overrides: Map<String, Value>,
    },
    Recursive {
        target: RecursiveTarget,
        sources: Vec<String>,
        convergence: Expr,
        max_iterations: u32,
        preserve_context: bool,
    },
    Code {
        source: String,
        language: String,
        allowed_imports: Vec<String>,
        limits: ResourceLimits,
    },
}

/// A single ready-to-run node.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub id: String,
    pub kind: NodeKind,
    pub dependencies: Vec<String>,
    pub level: usize,
    /// Loop or parallel node this node belongs to; contained nodes are
    /// executed by their container, never scheduled at the top level.
    pub container: Option<String>,
    pub payload: CompiledPayload,
    pub input_schema: Option<ValueSchema>,
    pub output_schema: Option<ValueSchema>,
    pub policy: PolicySnapshot,
}

/// The compiler's output: a validated, level-assigned executable graph.
///
/// Plans are cheap to clone and share; node payloads hold `Arc`ed factory
/// handles and sub-plans.
#[derive(Debug, Clone)]
pub struct Plan {
    pub blueprint_id: BlueprintId,
    pub nodes: HashMap<String, Arc<PlanNode>>,
    /// Top-level node ids grouped by level, each group sorted by id.
    pub levels: Vec<Vec<String>>,
    pub entry_level_ids: Vec<String>,
    pub terminal_level_ids: Vec<String>,
}

impl Plan {
    pub fn node(&self, id: &str) -> Option<&Arc<PlanNode>> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level nodes that list `id` as a dependency.
    pub fn dependents_of(&self, id: &str) -> Vec<&Arc<PlanNode>> {
        let mut out: Vec<&Arc<PlanNode>> = self
            .nodes
            .values()
            .filter(|n| n.container.is_none() && n.dependencies.iter().any(|d| d == id))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}
