//! ABOUTME: Run lifecycle event types and the EventSink capability
//! ABOUTME: Events carry type, run id, optional node id, timestamp, and payload

use crate::result::{NodeResult, RunResult};
use crate::types::RunId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Lifecycle event classes, in the order a consumer may observe them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    RunStarted,
    NodeStarted,
    NodeAttempt,
    NodeFinished,
    NodeSkipped,
    RunFinished,
}

/// Priority used by the engine's overflow policy: when the event queue is
/// past its soft limit, lower-priority classes are dropped first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low,
    Normal,
    Critical,
}

impl EventType {
    pub fn priority(self) -> EventPriority {
        match self {
            Self::NodeAttempt => EventPriority::Low,
            Self::NodeStarted => EventPriority::Normal,
            Self::RunStarted | Self::NodeFinished | Self::NodeSkipped | Self::RunFinished => {
                EventPriority::Critical
            }
        }
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub ts_ms: i64,
    pub payload: Value,
}

impl RunEvent {
    pub fn new(
        event_type: EventType,
        run_id: RunId,
        node_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type,
            run_id,
            node_id,
            ts_ms: Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn run_started(run_id: RunId) -> Self {
        Self::new(EventType::RunStarted, run_id, None, Value::Null)
    }

    pub fn node_started(run_id: RunId, node_id: &str) -> Self {
        Self::new(
            EventType::NodeStarted,
            run_id,
            Some(node_id.to_string()),
            Value::Null,
        )
    }

    pub fn node_attempt(run_id: RunId, node_id: &str, attempt: u32, error: Option<&str>) -> Self {
        Self::new(
            EventType::NodeAttempt,
            run_id,
            Some(node_id.to_string()),
            json!({"attempt": attempt, "error": error}),
        )
    }

    pub fn node_finished(run_id: RunId, node_id: &str, result: &NodeResult) -> Self {
        Self::new(
            EventType::NodeFinished,
            run_id,
            Some(node_id.to_string()),
            json!({
                "success": result.success,
                "attempts": result.attempts,
                "error_kind": result.error_kind,
                "error_message": result.error_message,
                "cost_estimate": result.cost_estimate,
                "tokens": result.tokens,
            }),
        )
    }

    pub fn node_skipped(run_id: RunId, node_id: &str, reason: &str) -> Self {
        Self::new(
            EventType::NodeSkipped,
            run_id,
            Some(node_id.to_string()),
            json!({"reason": reason}),
        )
    }

    pub fn run_finished(run_id: RunId, result: &RunResult) -> Self {
        Self::new(
            EventType::RunFinished,
            run_id,
            None,
            json!({
                "success": result.success,
                "terminated_reason": result.terminated_reason,
                "first_error": result.first_error,
            }),
        )
    }
}

/// External collaborator receiving lifecycle events.
///
/// `emit` must not block; implementations that serialize to transports are
/// expected to buffer internally.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &RunEvent) {}
}
