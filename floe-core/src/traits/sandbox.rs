//! ABOUTME: Sandbox executor capability for code nodes
//! ABOUTME: The engine never runs user code in-process; this seam does

use crate::blueprint::ResourceLimits;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request to evaluate user code out of process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub source: String,
    pub language: String,
    pub allowed_imports: Vec<String>,
    pub resource_limits: ResourceLimits,
    pub inputs: Map<String, Value>,
}

/// The sandbox's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub ok: bool,
    pub output: Value,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Sandbox executor capability. Resource-limit and policy violations are
/// reported as `Sandbox` errors and are never retried.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxOutcome>;
}
