//! Tests for the agent plan-act loop

use floe_compiler::{compile, CompileOptions, Plan};
use floe_core::blueprint::Blueprint;
use floe_core::error::ErrorKind;
use floe_core::registry::{ComponentFactory, ComponentRegistry};
use floe_core::traits::agent::Decision;
use floe_engine::{RunOptions, Runtime};
use floe_testing::{agent_node, EchoToolFactory, ScriptedAgentFactory};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn plan_for(registry: &Arc<ComponentRegistry>, blueprint: &Blueprint) -> Arc<Plan> {
    Arc::new(compile(blueprint, registry, &CompileOptions::default()).expect("blueprint compiles"))
}

fn tool_inputs(msg: &str) -> Map<String, Value> {
    let mut inputs = Map::new();
    inputs.insert("msg".to_string(), json!(msg));
    inputs
}

fn registry_with_agent(decisions: Vec<Decision>) -> (Arc<ComponentRegistry>, Arc<ScriptedAgentFactory>) {
    let registry = ComponentRegistry::new();
    registry
        .register("echo_tool", ComponentFactory::tool(EchoToolFactory))
        .unwrap();
    let agent = Arc::new(ScriptedAgentFactory::new("researcher", decisions));
    registry
        .register(
            "researcher",
            ComponentFactory::Agent(
                agent.clone() as Arc<dyn floe_core::traits::agent::AgentFactory>
            ),
        )
        .unwrap();
    (Arc::new(registry), agent)
}

#[tokio::test]
async fn test_agent_acts_then_finishes() {
    let (registry, agent) = registry_with_agent(vec![
        Decision::use_tool("echo_tool", tool_inputs("probe")),
        Decision::finish("all gathered"),
    ]);
    let blueprint = Blueprint::new(vec![agent_node("a", "researcher", &[], 5)]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let result = runtime
        .run(plan, Map::new(), RunOptions::default())
        .await_completion()
        .await
        .unwrap();

    assert!(result.success);
    let node = result.node("a").unwrap();
    assert_eq!(node.output["message"], json!("all gathered"));
    assert_eq!(node.output["iterations"], json!(2));

    let observations = agent.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0]["text"], json!("probe"));
}

#[tokio::test]
async fn test_agent_exceeding_cap_fails_non_converged() {
    let (registry, _) = registry_with_agent(vec![
        Decision::use_tool("echo_tool", tool_inputs("one")),
        Decision::use_tool("echo_tool", tool_inputs("two")),
        Decision::use_tool("echo_tool", tool_inputs("three")),
    ]);
    let blueprint = Blueprint::new(vec![agent_node("a", "researcher", &[], 2)]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let result = runtime
        .run(plan, Map::new(), RunOptions::default())
        .await_completion()
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.node("a").unwrap().error_kind,
        Some(ErrorKind::AgentNonConverged)
    );
}

#[tokio::test]
async fn test_agent_tool_whitelist_enforced() {
    let (registry, _) = registry_with_agent(vec![Decision::use_tool(
        "echo_tool",
        tool_inputs("blocked"),
    )]);
    // The node whitelist names a different tool, so the decision is refused.
    let blueprint = Blueprint::new(vec![agent_node("a", "researcher", &["sleep_tool"], 3)]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let result = runtime
        .run(plan, Map::new(), RunOptions::default())
        .await_completion()
        .await
        .unwrap();

    assert!(!result.success);
    let node = result.node("a").unwrap();
    assert_eq!(node.error_kind, Some(ErrorKind::Validation));
    assert!(node
        .error_message
        .as_deref()
        .unwrap()
        .contains("may not invoke"));
}
