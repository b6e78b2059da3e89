//! ABOUTME: Error types and handling for rs-floe
//! ABOUTME: Provides FloeError, the ErrorKind taxonomy, and the Result alias

use crate::registry::ComponentKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error classification.
///
/// Every failure that can reach a node result or a retry decision maps to
/// exactly one kind. `retry_on` lists in retry policies are expressed in
/// terms of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Compile,
    NotFound,
    AlreadyRegistered,
    Factory,
    CapabilityMismatch,
    UnresolvedBinding,
    Timeout,
    Cancelled,
    Tool,
    LlmProvider,
    Sandbox,
    Budget,
    AgentNonConverged,
    RecursionNonConverged,
    IllegalCycle,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Compile => "compile",
            Self::NotFound => "not_found",
            Self::AlreadyRegistered => "already_registered",
            Self::Factory => "factory",
            Self::CapabilityMismatch => "capability_mismatch",
            Self::UnresolvedBinding => "unresolved_binding",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Tool => "tool",
            Self::LlmProvider => "llm_provider",
            Self::Sandbox => "sandbox",
            Self::Budget => "budget",
            Self::AgentNonConverged => "agent_non_converged",
            Self::RecursionNonConverged => "recursion_non_converged",
            Self::IllegalCycle => "illegal_cycle",
            Self::Internal => "internal",
        }
    }

    /// Kinds retried by default when no explicit `retry_on` list is given.
    pub fn retriable_by_default(self) -> bool {
        matches!(self, Self::Timeout | Self::LlmProvider)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comprehensive error enum for all Floe operations
#[derive(Debug, Error)]
pub enum FloeError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Component not found: {kind}/{name}")]
    NotFound { kind: ComponentKind, name: String },

    #[error("Component already registered: {kind}/{name}")]
    AlreadyRegistered { kind: ComponentKind, name: String },

    #[error("Factory error for {kind}/{name}: {message}")]
    Factory {
        kind: ComponentKind,
        name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Capability mismatch for {name}: {message}")]
    CapabilityMismatch { name: String, message: String },

    #[error("Unresolved binding `{path}`")]
    UnresolvedBinding { path: String, node: Option<String> },

    #[error("Node '{node}' timed out after {timeout_ms}ms")]
    Timeout { node: String, timeout_ms: u64 },

    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Tool error: {message}")]
    Tool { message: String, transient: bool },

    #[error("Provider error: {message}")]
    Provider {
        message: String,
        provider: Option<String>,
        transient: bool,
    },

    #[error("Sandbox violation: {message}")]
    Sandbox { message: String },

    #[error("Budget exceeded: projected ${attempted_usd:.4} over limit ${limit_usd:.4}")]
    Budget {
        limit_usd: f64,
        attempted_usd: f64,
        node: Option<String>,
    },

    #[error("Agent did not converge within {max_iterations} iterations")]
    AgentNonConverged { max_iterations: u32 },

    #[error("Recursion did not converge within {max_iterations} iterations")]
    RecursionNonConverged { max_iterations: u32 },

    #[error("Nested run failed: {message}")]
    Nested { kind: ErrorKind, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FloeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The taxonomy kind this error reports as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            Self::Factory { .. } => ErrorKind::Factory,
            Self::CapabilityMismatch { .. } => ErrorKind::CapabilityMismatch,
            Self::UnresolvedBinding { .. } => ErrorKind::UnresolvedBinding,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::Provider { .. } => ErrorKind::LlmProvider,
            Self::Sandbox { .. } => ErrorKind::Sandbox,
            Self::Budget { .. } => ErrorKind::Budget,
            Self::AgentNonConverged { .. } => ErrorKind::AgentNonConverged,
            Self::RecursionNonConverged { .. } => ErrorKind::RecursionNonConverged,
            Self::Nested { kind, .. } => *kind,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the underlying failure was reported as transient.
    ///
    /// Timeouts are always transient; tool and provider failures carry an
    /// explicit flag from the component that produced them.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Tool { transient, .. } | Self::Provider { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, FloeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = FloeError::Timeout {
            node: "n1".to_string(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_transient());

        let err = FloeError::validation("bad input");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_flags() {
        let transient = FloeError::Tool {
            message: "connection reset".to_string(),
            transient: true,
        };
        let permanent = FloeError::Tool {
            message: "unknown operation".to_string(),
            transient: false,
        };
        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
    }

    #[test]
    fn test_default_retriable_kinds() {
        assert!(ErrorKind::Timeout.retriable_by_default());
        assert!(ErrorKind::LlmProvider.retriable_by_default());
        assert!(!ErrorKind::Validation.retriable_by_default());
        assert!(!ErrorKind::Budget.retriable_by_default());
        assert!(!ErrorKind::Cancelled.retriable_by_default());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::LlmProvider).unwrap();
        assert_eq!(json, "\"llm_provider\"");
        let kind: ErrorKind = serde_json::from_str("\"budget\"").unwrap();
        assert_eq!(kind, ErrorKind::Budget);
    }
}
