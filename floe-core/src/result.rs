//! ABOUTME: Run-time result value types
//! ABOUTME: Provides NodeResult, RunResult, and TerminatedReason

use crate::error::{ErrorKind, FloeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of a single node execution, published to the run context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,
    pub output: Value,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempts: u32,
    pub cost_estimate: f64,
    pub tokens: u64,
}

impl NodeResult {
    pub fn success(output: Value, started_at: DateTime<Utc>, attempts: u32) -> Self {
        Self {
            success: true,
            output,
            error_kind: None,
            error_message: None,
            started_at,
            finished_at: Utc::now(),
            attempts,
            cost_estimate: 0.0,
            tokens: 0,
        }
    }

    pub fn failure(error: &FloeError, started_at: DateTime<Utc>, attempts: u32) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
            started_at,
            finished_at: Utc::now(),
            attempts,
            cost_estimate: 0.0,
            tokens: 0,
        }
    }

    pub fn with_cost(mut self, cost_estimate: f64) -> Self {
        self.cost_estimate = cost_estimate;
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    /// Field lookup on the output object, used by template binding.
    pub fn output_field(&self, name: &str) -> Option<&Value> {
        self.output.as_object().and_then(|map| map.get(name))
    }
}

/// Why a run reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatedReason {
    Completed,
    Failed,
    BudgetExceeded,
    Cancelled,
}

/// Final outcome of a run: per-node results plus terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub context: HashMap<String, NodeResult>,
    pub terminated_reason: TerminatedReason,
    /// Kind and message of the first unrecoverable failure, if any.
    pub first_error: Option<(ErrorKind, String)>,
}

impl RunResult {
    pub fn node(&self, id: &str) -> Option<&NodeResult> {
        self.context.get(id)
    }
}
