//! Tests for parallel fan-out: concurrency bounds and ordered aggregation

use floe_compiler::{compile, CompileOptions, Plan};
use floe_core::blueprint::{Blueprint, NodePayload, NodeSpec, ParallelSpec};
use floe_core::registry::{ComponentFactory, ComponentRegistry};
use floe_engine::{RunOptions, Runtime};
use floe_testing::{tool_node, SleepToolFactory};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn registry_with_sleep() -> Arc<ComponentRegistry> {
    let registry = ComponentRegistry::new();
    registry
        .register(
            "sleep_tool",
            ComponentFactory::tool(SleepToolFactory::new("sleep_tool", 100)),
        )
        .unwrap();
    Arc::new(registry)
}

fn parallel_node(id: &str, branches: Vec<Vec<&str>>, max_concurrency: usize) -> NodeSpec {
    NodeSpec::new(
        id,
        NodePayload::Parallel(ParallelSpec {
            branches: branches
                .into_iter()
                .map(|b| b.into_iter().map(str::to_string).collect())
                .collect(),
            max_concurrency,
        }),
    )
}

fn plan_for(registry: &Arc<ComponentRegistry>, blueprint: &Blueprint) -> Arc<Plan> {
    Arc::new(compile(blueprint, registry, &CompileOptions::default()).expect("blueprint compiles"))
}

#[tokio::test]
async fn test_bounded_fan_out_wall_clock() {
    let registry = registry_with_sleep();
    let blueprint = Blueprint::new(vec![
        parallel_node("fan", vec![vec!["b0"], vec!["b1"], vec!["b2"], vec!["b3"]], 2),
        tool_node("b0", "sleep_tool", json!({"ms": 100})),
        tool_node("b1", "sleep_tool", json!({"ms": 100})),
        tool_node("b2", "sleep_tool", json!({"ms": 100})),
        tool_node("b3", "sleep_tool", json!({"ms": 100})),
    ]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let started = Instant::now();
    let result = runtime
        .run(plan, Map::new(), RunOptions::default())
        .await_completion()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.success);
    // Four 100ms branches through a two-wide gate: two waves.
    assert!(elapsed >= Duration::from_millis(200), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "elapsed: {elapsed:?}");

    let fan = result.node("fan").unwrap();
    let branches = fan.output["branches"].as_array().unwrap();
    assert_eq!(branches.len(), 4);
    for branch in branches {
        assert_eq!(branch["slept_ms"], json!(100));
    }
}

#[tokio::test]
async fn test_aggregation_preserves_declaration_order() {
    let registry = registry_with_sleep();
    // Branch sleeps are reverse-sorted so completion order is the opposite
    // of declaration order.
    let blueprint = Blueprint::new(vec![
        parallel_node("fan", vec![vec!["b0"], vec!["b1"], vec!["b2"], vec!["b3"]], 4),
        tool_node("b0", "sleep_tool", json!({"ms": 120})),
        tool_node("b1", "sleep_tool", json!({"ms": 80})),
        tool_node("b2", "sleep_tool", json!({"ms": 40})),
        tool_node("b3", "sleep_tool", json!({"ms": 5})),
    ]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let result = runtime
        .run(plan, Map::new(), RunOptions::default())
        .await_completion()
        .await
        .unwrap();

    assert!(result.success);
    let branches = result.node("fan").unwrap().output["branches"]
        .as_array()
        .cloned()
        .unwrap();
    let slept: Vec<u64> = branches
        .iter()
        .map(|b| b["slept_ms"].as_u64().unwrap())
        .collect();
    assert_eq!(slept, vec![120, 80, 40, 5]);
}

#[tokio::test]
async fn test_branch_failure_fails_the_parallel_node() {
    let registry = registry_with_sleep();
    registry
        .register(
            "broken",
            ComponentFactory::tool(floe_testing::FailingToolFactory {
                name: "broken".to_string(),
                transient: false,
            }),
        )
        .unwrap();

    let blueprint = Blueprint::new(vec![
        parallel_node("fan", vec![vec!["ok"], vec!["bad"]], 2),
        tool_node("ok", "sleep_tool", json!({"ms": 5})),
        tool_node("bad", "broken", json!({})),
    ]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let result = runtime
        .run(plan, Map::new(), RunOptions::default())
        .await_completion()
        .await
        .unwrap();

    assert!(!result.success);
    let fan = result.node("fan").unwrap();
    assert!(!fan.success);
    assert!(fan
        .error_message
        .as_deref()
        .unwrap()
        .contains("bad"));
}

#[tokio::test]
async fn test_independent_nodes_in_a_level_run_concurrently() {
    let registry = registry_with_sleep();
    let blueprint = Blueprint::new(vec![
        tool_node("s1", "sleep_tool", json!({"ms": 100})),
        tool_node("s2", "sleep_tool", json!({"ms": 100})),
        tool_node("s3", "sleep_tool", json!({"ms": 100})),
    ]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let started = Instant::now();
    let result = runtime
        .run(plan, Map::new(), RunOptions::default())
        .await_completion()
        .await
        .unwrap();

    assert!(result.success);
    assert!(
        started.elapsed() < Duration::from_millis(280),
        "level members must not serialize: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_max_parallel_serializes_a_level() {
    let registry = registry_with_sleep();
    let blueprint = Blueprint::new(vec![
        tool_node("s1", "sleep_tool", json!({"ms": 80})),
        tool_node("s2", "sleep_tool", json!({"ms": 80})),
    ]);
    let plan = plan_for(&registry, &blueprint);

    let runtime = Runtime::new(registry);
    let started = Instant::now();
    let result = runtime
        .run(
            plan,
            Map::new(),
            RunOptions::default().with_max_parallel(1),
        )
        .await_completion()
        .await
        .unwrap();

    assert!(result.success);
    assert!(
        started.elapsed() >= Duration::from_millis(160),
        "max_parallel=1 must serialize: {:?}",
        started.elapsed()
    );
}
