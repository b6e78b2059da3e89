//! ABOUTME: Process-wide component registry keyed by (kind, name)
//! ABOUTME: Copy-on-write snapshots; typed factories; strict registration rules

use crate::blueprint::Blueprint;
use crate::error::{FloeError, Result};
use crate::traits::agent::{Agent, AgentFactory};
use crate::traits::provider::{LlmProvider, ProviderFactory};
use crate::traits::tool::{Tool, ToolFactory};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Registrable component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Tool,
    Agent,
    Workflow,
    LlmProvider,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Agent => "agent",
            Self::Workflow => "workflow",
            Self::LlmProvider => "llm-provider",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered factory, typed by kind.
///
/// Workflow entries hold the referenced blueprint itself; the compiler turns
/// it into a nested plan at compile time, which is the workflow capability
/// (`plan_ref`) the resolved handle ultimately exposes.
#[derive(Clone)]
pub enum ComponentFactory {
    Tool(Arc<dyn ToolFactory>),
    Agent(Arc<dyn AgentFactory>),
    Workflow(Arc<Blueprint>),
    LlmProvider(Arc<dyn ProviderFactory>),
}

impl ComponentFactory {
    pub fn tool(factory: impl ToolFactory + 'static) -> Self {
        Self::Tool(Arc::new(factory))
    }

    pub fn agent(factory: impl AgentFactory + 'static) -> Self {
        Self::Agent(Arc::new(factory))
    }

    pub fn workflow(blueprint: Blueprint) -> Self {
        Self::Workflow(Arc::new(blueprint))
    }

    pub fn llm_provider(factory: impl ProviderFactory + 'static) -> Self {
        Self::LlmProvider(Arc::new(factory))
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Tool(_) => ComponentKind::Tool,
            Self::Agent(_) => ComponentKind::Agent,
            Self::Workflow(_) => ComponentKind::Workflow,
            Self::LlmProvider(_) => ComponentKind::LlmProvider,
        }
    }

    /// Stable content identity used by the idempotence check.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Tool(f) => format!("tool:{}", f.fingerprint()),
            Self::Agent(f) => format!("agent:{}", f.fingerprint()),
            Self::Workflow(b) => format!("workflow:{}", b.id()),
            Self::LlmProvider(f) => format!("llm-provider:{}", f.fingerprint()),
        }
    }

    /// Content-identity check: same allocation, or equal fingerprints.
    fn identical(&self, other: &Self) -> bool {
        let same_allocation = match (self, other) {
            (Self::Tool(a), Self::Tool(b)) => Arc::ptr_eq(a, b),
            (Self::Agent(a), Self::Agent(b)) => Arc::ptr_eq(a, b),
            (Self::Workflow(a), Self::Workflow(b)) => Arc::ptr_eq(a, b),
            (Self::LlmProvider(a), Self::LlmProvider(b)) => Arc::ptr_eq(a, b),
            _ => return false,
        };
        same_allocation || self.fingerprint() == other.fingerprint()
    }
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("kind", &self.kind())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// A resolved registry entry, ready to instantiate.
#[derive(Debug, Clone)]
pub struct FactoryHandle {
    pub kind: ComponentKind,
    pub name: String,
    factory: ComponentFactory,
}

impl FactoryHandle {
    pub fn factory(&self) -> &ComponentFactory {
        &self.factory
    }

    /// Instantiate as a tool; the handle must hold a tool factory.
    pub fn instantiate_tool(&self, params: &Map<String, Value>) -> Result<Arc<dyn Tool>> {
        match &self.factory {
            ComponentFactory::Tool(factory) => {
                factory.instantiate(params).map_err(|e| FloeError::Factory {
                    kind: ComponentKind::Tool,
                    name: self.name.clone(),
                    message: e.to_string(),
                    source: Some(e.into()),
                })
            }
            other => Err(self.mismatch("tool", other.kind())),
        }
    }

    /// Instantiate as an agent; the handle must hold an agent factory.
    pub fn instantiate_agent(&self, params: &Map<String, Value>) -> Result<Arc<dyn Agent>> {
        match &self.factory {
            ComponentFactory::Agent(factory) => {
                factory.instantiate(params).map_err(|e| FloeError::Factory {
                    kind: ComponentKind::Agent,
                    name: self.name.clone(),
                    message: e.to_string(),
                    source: Some(e.into()),
                })
            }
            other => Err(self.mismatch("agent", other.kind())),
        }
    }

    /// Instantiate as an LLM provider.
    pub fn instantiate_provider(&self) -> Result<Arc<dyn LlmProvider>> {
        match &self.factory {
            ComponentFactory::LlmProvider(factory) => {
                factory.instantiate().map_err(|e| FloeError::Factory {
                    kind: ComponentKind::LlmProvider,
                    name: self.name.clone(),
                    message: e.to_string(),
                    source: Some(e.into()),
                })
            }
            other => Err(self.mismatch("llm-provider", other.kind())),
        }
    }

    /// The referenced blueprint for workflow entries.
    pub fn blueprint(&self) -> Result<Arc<Blueprint>> {
        match &self.factory {
            ComponentFactory::Workflow(blueprint) => Ok(Arc::clone(blueprint)),
            other => Err(self.mismatch("workflow", other.kind())),
        }
    }

    fn mismatch(&self, expected: &str, actual: ComponentKind) -> FloeError {
        FloeError::CapabilityMismatch {
            name: self.name.clone(),
            message: format!("expected {expected} capabilities, registered as {actual}"),
        }
    }
}

type RegistryKey = (ComponentKind, String);
type RegistryMap = HashMap<RegistryKey, ComponentFactory>;

/// Process-wide catalog of factories keyed by `(kind, name)`.
///
/// Readers resolve against a stable copy-on-write snapshot: `register`
/// clones the map and swaps the `Arc` under a writer lock, so resolution
/// never blocks on registration. Names are case-sensitive.
///
/// # Examples
///
/// ```
/// use floe_core::registry::{ComponentFactory, ComponentKind, ComponentRegistry};
/// use floe_core::Blueprint;
///
/// let registry = ComponentRegistry::new();
/// registry
///     .register("sub", ComponentFactory::workflow(Blueprint::new(vec![])))
///     .unwrap();
/// assert!(registry.resolve(ComponentKind::Workflow, "sub").is_ok());
/// assert!(registry.resolve(ComponentKind::Tool, "sub").is_err());
/// ```
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    entries: RwLock<Arc<RegistryMap>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its kind and the given name.
    ///
    /// Re-registering a content-identical factory is a no-op; a conflicting
    /// factory under an existing `(kind, name)` fails `AlreadyRegistered`.
    pub fn register(&self, name: impl Into<String>, factory: ComponentFactory) -> Result<()> {
        let name = name.into();
        let kind = factory.kind();
        let key = (kind, name.clone());

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            if existing.identical(&factory) {
                debug!(%kind, %name, "idempotent re-registration ignored");
                return Ok(());
            }
            return Err(FloeError::AlreadyRegistered { kind, name });
        }

        let mut next: RegistryMap = entries.as_ref().clone();
        next.insert(key, factory);
        *entries = Arc::new(next);
        debug!(%kind, %name, "component registered");
        Ok(())
    }

    /// Resolve a handle, or fail `NotFound`.
    pub fn resolve(&self, kind: ComponentKind, name: &str) -> Result<FactoryHandle> {
        let snapshot = self.snapshot();
        snapshot
            .get(&(kind, name.to_string()))
            .map(|factory| FactoryHandle {
                kind,
                name: name.to_string(),
                factory: factory.clone(),
            })
            .ok_or_else(|| FloeError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, kind: ComponentKind, name: &str) -> bool {
        self.snapshot().contains_key(&(kind, name.to_string()))
    }

    /// Registered names, optionally filtered by kind, sorted for
    /// deterministic listings.
    pub fn list(&self, kind: Option<ComponentKind>) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut names: Vec<String> = snapshot
            .keys()
            .filter(|(k, _)| kind.map_or(true, |wanted| *k == wanted))
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn snapshot(&self) -> Arc<RegistryMap> {
        Arc::clone(&self.entries.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::ValueSchema;
    use crate::traits::tool::{Invocation, Tool};
    use async_trait::async_trait;

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn input_schema(&self) -> ValueSchema {
            ValueSchema::new()
        }

        fn output_schema(&self) -> ValueSchema {
            ValueSchema::new()
        }

        async fn execute(
            &self,
            inputs: Map<String, Value>,
            _invocation: &Invocation,
        ) -> crate::error::Result<Map<String, Value>> {
            Ok(inputs)
        }
    }

    struct NoopToolFactory {
        name: String,
        version: u32,
        fail: bool,
    }

    impl NoopToolFactory {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                version: 1,
                fail: false,
            }
        }
    }

    impl ToolFactory for NoopToolFactory {
        fn name(&self) -> &str {
            &self.name
        }

        fn instantiate(&self, _params: &Map<String, Value>) -> anyhow::Result<Arc<dyn Tool>> {
            if self.fail {
                anyhow::bail!("constructor exploded");
            }
            Ok(Arc::new(NoopTool))
        }

        fn fingerprint(&self) -> String {
            format!("{}@{}", self.name, self.version)
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = ComponentRegistry::new();
        registry
            .register("echo", ComponentFactory::tool(NoopToolFactory::new("echo")))
            .unwrap();

        let handle = registry.resolve(ComponentKind::Tool, "echo").unwrap();
        assert_eq!(handle.kind, ComponentKind::Tool);
        assert!(handle.instantiate_tool(&Map::new()).is_ok());
    }

    #[test]
    fn test_resolve_missing_fails_not_found() {
        let registry = ComponentRegistry::new();
        let err = registry.resolve(ComponentKind::Tool, "ghost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_idempotent_reregistration() {
        let registry = ComponentRegistry::new();
        let factory = ComponentFactory::tool(NoopToolFactory::new("echo"));
        registry.register("echo", factory.clone()).unwrap();
        // Same allocation: no-op.
        registry.register("echo", factory).unwrap();
        // Different allocation, identical fingerprint: still a no-op.
        registry
            .register("echo", ComponentFactory::tool(NoopToolFactory::new("echo")))
            .unwrap();
        assert_eq!(registry.list(Some(ComponentKind::Tool)), vec!["echo"]);
    }

    #[test]
    fn test_conflicting_registration_rejected() {
        let registry = ComponentRegistry::new();
        registry
            .register("echo", ComponentFactory::tool(NoopToolFactory::new("echo")))
            .unwrap();
        let conflicting = ComponentFactory::tool(NoopToolFactory {
            name: "echo".to_string(),
            version: 2,
            fail: false,
        });
        let err = registry.register("echo", conflicting).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyRegistered);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let registry = ComponentRegistry::new();
        registry
            .register("Echo", ComponentFactory::tool(NoopToolFactory::new("Echo")))
            .unwrap();
        assert!(registry.resolve(ComponentKind::Tool, "echo").is_err());
        assert!(registry.resolve(ComponentKind::Tool, "Echo").is_ok());
    }

    #[test]
    fn test_same_name_different_kind_coexist() {
        let registry = ComponentRegistry::new();
        registry
            .register("dup", ComponentFactory::tool(NoopToolFactory::new("dup")))
            .unwrap();
        registry
            .register("dup", ComponentFactory::workflow(Blueprint::new(vec![])))
            .unwrap();
        assert_eq!(registry.list(None).len(), 2);
        assert_eq!(registry.list(Some(ComponentKind::Workflow)), vec!["dup"]);
    }

    #[test]
    fn test_factory_error_wrapped() {
        let registry = ComponentRegistry::new();
        registry
            .register(
                "boom",
                ComponentFactory::tool(NoopToolFactory {
                    name: "boom".to_string(),
                    version: 1,
                    fail: true,
                }),
            )
            .unwrap();
        let handle = registry.resolve(ComponentKind::Tool, "boom").unwrap();
        let err = handle.instantiate_tool(&Map::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Factory);
        assert!(err.to_string().contains("constructor exploded"));
    }

    #[test]
    fn test_capability_mismatch() {
        let registry = ComponentRegistry::new();
        registry
            .register("sub", ComponentFactory::workflow(Blueprint::new(vec![])))
            .unwrap();
        let handle = registry.resolve(ComponentKind::Workflow, "sub").unwrap();
        let err = handle.instantiate_tool(&Map::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityMismatch);
    }

    #[test]
    fn test_concurrent_idempotent_registration() {
        let registry = Arc::new(ComponentRegistry::new());
        let factory = ComponentFactory::tool(NoopToolFactory::new("shared"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let factory = factory.clone();
                std::thread::spawn(move || registry.register("shared", factory))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(registry.list(None), vec!["shared"]);
    }
}
