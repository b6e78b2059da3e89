//! ABOUTME: Append-only run context with scoped child contexts
//! ABOUTME: Publication is atomic per node; children shadow iteration locals

use floe_core::result::NodeResult;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// The accumulated results of a run, keyed by node id.
///
/// The context is append-only: once a node's result is published it never
/// changes, and readers observe either the pre-publish or post-publish
/// snapshot, never a partial write. Loop iterations, parallel branches, and
/// recursion iterations run against child contexts whose lookups fall back
/// to the parent; only the container's aggregated result is published
/// upward.
#[derive(Debug)]
pub struct RunContext {
    parent: Option<Arc<RunContext>>,
    initial_inputs: Arc<Map<String, Value>>,
    locals: Map<String, Value>,
    results: RwLock<HashMap<String, Arc<NodeResult>>>,
}

impl RunContext {
    /// Root context for a run (or a nested workflow run).
    pub fn root(initial_inputs: Map<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            initial_inputs: Arc::new(initial_inputs),
            locals: Map::new(),
            results: RwLock::new(HashMap::new()),
        })
    }

    /// Child scope with iteration-local bindings (`item`, `index`,
    /// `recursive_context`). Results published here stay here.
    pub fn child(self: &Arc<Self>, locals: Map<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            initial_inputs: Arc::clone(&self.initial_inputs),
            locals,
            results: RwLock::new(HashMap::new()),
        })
    }

    /// Publish a node result. Re-publication is refused: the first result
    /// wins and the attempt is logged as an engine bug.
    pub fn publish(&self, node_id: &str, result: NodeResult) -> Arc<NodeResult> {
        let mut results = self.results.write();
        if let Some(existing) = results.get(node_id) {
            error!(node_id, "attempted re-publication into append-only context");
            return Arc::clone(existing);
        }
        let result = Arc::new(result);
        results.insert(node_id.to_string(), Arc::clone(&result));
        result
    }

    /// Resolve a node result, walking up through parent scopes.
    pub fn get(&self, node_id: &str) -> Option<Arc<NodeResult>> {
        if let Some(result) = self.results.read().get(node_id) {
            return Some(Arc::clone(result));
        }
        self.parent.as_ref().and_then(|p| p.get(node_id))
    }

    /// Resolve an iteration-local binding, innermost scope first.
    pub fn local(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.locals.get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.local(name))
    }

    pub fn initial_inputs(&self) -> &Map<String, Value> {
        &self.initial_inputs
    }

    pub fn initial_input(&self, name: &str) -> Option<&Value> {
        self.initial_inputs.get(name)
    }

    /// Clone out this scope's results (parents excluded).
    pub fn snapshot_results(&self) -> HashMap<String, NodeResult> {
        self.results
            .read()
            .iter()
            .map(|(id, result)| (id.clone(), result.as_ref().clone()))
            .collect()
    }
}
