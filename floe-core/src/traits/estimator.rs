//! ABOUTME: Cost estimator capability for budget preflight
//! ABOUTME: Advisory estimates only; the core meters nothing

use crate::blueprint::NodeKind;
use serde_json::{Map, Value};

/// Advisory cost estimator consulted before every node execution.
///
/// The engine passes the node's kind, id, and effective (already bound)
/// inputs; the estimate feeds the run-scoped budget accountant.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, kind: NodeKind, node_id: &str, effective_inputs: &Map<String, Value>)
        -> f64;
}

/// Estimator that prices everything at zero; the default when no estimator
/// is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroCostEstimator;

impl CostEstimator for ZeroCostEstimator {
    fn estimate(&self, _kind: NodeKind, _node_id: &str, _inputs: &Map<String, Value>) -> f64 {
        0.0
    }
}
