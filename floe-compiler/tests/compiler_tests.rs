//! Comprehensive tests for blueprint compilation

use floe_compiler::{compile, CompileOptions, CompiledPayload, IssueKind};
use floe_core::blueprint::{Blueprint, NodeKind};
use floe_core::registry::{ComponentFactory, ComponentRegistry};
use floe_core::schema::{ValueSchema, ValueType};
use floe_testing::{
    condition_node, llm_node, recursive_node, tool_node, workflow_node, EchoProviderFactory,
    EchoToolFactory, ScriptedAgentFactory,
};
use serde_json::json;
use std::sync::Arc;

fn registry() -> Arc<ComponentRegistry> {
    let registry = ComponentRegistry::new();
    registry
        .register("echo_tool", ComponentFactory::tool(EchoToolFactory))
        .unwrap();
    registry
        .register(
            "stub-model",
            ComponentFactory::llm_provider(EchoProviderFactory::new("stub-model")),
        )
        .unwrap();
    registry
        .register(
            "improver",
            ComponentFactory::agent(ScriptedAgentFactory::new("improver", vec![])),
        )
        .unwrap();
    Arc::new(registry)
}

fn options() -> CompileOptions {
    CompileOptions::default()
}

#[test]
fn test_two_node_pipeline_compiles() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("n1", "echo_tool", json!({"msg": "hello"})),
        llm_node("n2", "stub-model", "say: ${n1.text}").with_dependency("n1"),
    ]);

    let plan = compile(&blueprint, &registry, &options()).unwrap();
    assert_eq!(plan.len(), 2);
    assert_eq!(plan.levels, vec![vec!["n1".to_string()], vec!["n2".to_string()]]);
    assert_eq!(plan.entry_level_ids, vec!["n1"]);
    assert_eq!(plan.terminal_level_ids, vec!["n2"]);

    let n2 = plan.node("n2").unwrap();
    assert_eq!(n2.level, 1);
    // The llm output schema defaults to {text: string}.
    assert_eq!(
        n2.output_schema.as_ref().unwrap().get("text"),
        Some(ValueType::String)
    );
}

#[test]
fn test_compilation_is_deterministic() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("b", "echo_tool", json!({})),
        tool_node("a", "echo_tool", json!({})),
        tool_node("z", "echo_tool", json!({}))
            .with_dependency("a")
            .with_dependency("b"),
    ]);

    let first = compile(&blueprint, &registry, &options()).unwrap();
    let second = compile(&blueprint, &registry, &options()).unwrap();

    assert_eq!(first.blueprint_id, second.blueprint_id);
    assert_eq!(first.levels, second.levels);
    // Level sets come out sorted by node id.
    assert_eq!(first.levels[0], vec!["a".to_string(), "b".to_string()]);
    for (id, node) in &first.nodes {
        assert_eq!(node.level, second.nodes[id].level);
    }
}

#[test]
fn test_level_soundness_on_diamond() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("root", "echo_tool", json!({})),
        tool_node("left", "echo_tool", json!({})).with_dependency("root"),
        tool_node("right", "echo_tool", json!({})).with_dependency("root"),
        tool_node("join", "echo_tool", json!({}))
            .with_dependency("left")
            .with_dependency("right"),
    ]);

    let plan = compile(&blueprint, &registry, &options()).unwrap();
    for node in plan.nodes.values() {
        for dep in &node.dependencies {
            assert!(
                plan.nodes[dep].level < node.level,
                "edge {dep} -> {} violates level order",
                node.id
            );
        }
    }
    assert_eq!(plan.node("join").unwrap().level, 2);
}

#[test]
fn test_illegal_cycle_rejected() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("a", "echo_tool", json!({})).with_dependency("b"),
        tool_node("b", "echo_tool", json!({})).with_dependency("a"),
    ]);

    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report
        .errors()
        .any(|issue| issue.kind == IssueKind::IllegalCycle));
}

#[test]
fn test_recursion_cycle_is_permitted() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("n_propose", "echo_tool", json!({"msg": "seed"})),
        recursive_node(
            "rec",
            "improver",
            &["n_propose"],
            "${accumulator.text} == 'done'",
            5,
        ),
    ]);

    let plan = compile(&blueprint, &registry, &options()).unwrap();
    let rec = plan.node("rec").unwrap();
    assert_eq!(rec.kind, NodeKind::Recursive);
    assert!(plan.node("n_propose").unwrap().level < rec.level);
}

#[test]
fn test_recursive_source_must_be_dependency() {
    let registry = registry();
    let mut rec = recursive_node("rec", "improver", &[], "${iteration} >= 1", 3);
    if let floe_core::blueprint::NodePayload::Recursive(spec) = &mut rec.payload {
        spec.recursive_sources = vec!["seed".to_string()];
    }
    let blueprint = Blueprint::new(vec![tool_node("seed", "echo_tool", json!({})), rec]);

    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report
        .errors()
        .any(|issue| issue.kind == IssueKind::RecursiveSource));
}

#[test]
fn test_duplicate_and_dangling_collected_together() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("dup", "echo_tool", json!({})),
        tool_node("dup", "echo_tool", json!({})),
        tool_node("n", "echo_tool", json!({})).with_dependency("ghost"),
    ]);

    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    // Best-effort collection reports both problems in one pass.
    assert!(report.errors().any(|i| i.kind == IssueKind::DuplicateId));
    assert!(report
        .errors()
        .any(|i| i.kind == IssueKind::UnknownDependency));
}

#[test]
fn test_unknown_component_reported() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![tool_node("n", "no_such_tool", json!({}))]);
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    let issue = report
        .errors()
        .find(|i| i.kind == IssueKind::UnknownComponent)
        .unwrap();
    assert_eq!(issue.node.as_deref(), Some("n"));
}

#[test]
fn test_template_root_must_be_upstream() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("a", "echo_tool", json!({})),
        tool_node("b", "echo_tool", json!({"msg": "${a.text}"})),
    ]);

    // `b` does not depend on `a`, so the reference is invalid.
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report
        .errors()
        .any(|i| i.kind == IssueKind::UnknownBinding && i.node.as_deref() == Some("b")));
}

#[test]
fn test_item_binding_only_inside_loops() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![tool_node(
        "n",
        "echo_tool",
        json!({"msg": "${item}"}),
    )]);
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::UnknownBinding));
}

#[test]
fn test_reserved_node_id_rejected() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![tool_node("inputs", "echo_tool", json!({}))]);
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::ReservedName));
}

#[test]
fn test_condition_branches_checked() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("n1", "echo_tool", json!({})),
        condition_node("cond", "${n1.text} == 'x'", &["ghost"], &[]).with_dependency("n1"),
    ]);
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::Payload));
}

#[test]
fn test_convergence_condition_roots_restricted() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("n_propose", "echo_tool", json!({})),
        recursive_node("rec", "improver", &["n_propose"], "${n_propose.text} == 'x'", 3),
    ]);
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::UnknownBinding));
}

#[test]
fn test_declared_inputs_must_be_bound() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![tool_node("n", "echo_tool", json!({}))
        .with_input_schema(ValueSchema::new().with("msg", ValueType::String))]);
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::UnboundInput));
}

#[test]
fn test_type_mismatch_warning_becomes_error_in_strict() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("up", "echo_tool", json!({"msg": "x"}))
            .with_output_schema(ValueSchema::new().with("count", ValueType::Integer)),
        tool_node("down", "echo_tool", json!({"msg": "${up.count}"}))
            .with_dependency("up")
            .with_input_schema(ValueSchema::new().with("msg", ValueType::String)),
    ]);

    // Lax mode: the mismatch is a warning and compilation succeeds.
    assert!(compile(&blueprint, &registry, &options()).is_ok());

    let strict = CompileOptions {
        strict: true,
        ..CompileOptions::default()
    };
    let report = compile(&blueprint, &registry, &strict).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::TypeMismatch));
}

#[test]
fn test_sub_workflow_compiles_inline() {
    let registry = registry();
    let inner = Blueprint::new(vec![tool_node("inner", "echo_tool", json!({"msg": "sub"}))]);
    registry
        .register("sub", ComponentFactory::workflow(inner))
        .unwrap();

    let outer = Blueprint::new(vec![workflow_node("w", "sub", json!({}))]);
    let plan = compile(&outer, &registry, &options()).unwrap();
    match &plan.node("w").unwrap().payload {
        CompiledPayload::Workflow { plan: sub, .. } => {
            assert_eq!(sub.len(), 1);
            assert!(sub.node("inner").is_some());
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn test_sub_workflow_self_reference_rejected() {
    let registry = registry();
    // The registered blueprint contains a workflow node referencing its own
    // registration; compiling it walks straight back into itself.
    let recursive_blueprint = Blueprint::new(vec![workflow_node("again", "loops", json!({}))]);
    registry
        .register("loops", ComponentFactory::workflow(recursive_blueprint.clone()))
        .unwrap();

    let report = compile(&recursive_blueprint, &registry, &options()).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::WorkflowCycle));
}

#[test]
fn test_sub_workflow_depth_cap() {
    let registry = registry();
    let inner = Blueprint::new(vec![tool_node("inner", "echo_tool", json!({}))]);
    registry
        .register("leaf", ComponentFactory::workflow(inner))
        .unwrap();

    let outer = Blueprint::new(vec![workflow_node("w", "leaf", json!({}))]);
    let shallow = CompileOptions {
        max_workflow_depth: 1,
        ..CompileOptions::default()
    };
    let report = compile(&outer, &registry, &shallow).unwrap_err();
    assert!(report
        .errors()
        .any(|i| i.kind == IssueKind::WorkflowDepthExceeded));
}

#[test]
fn test_loop_body_contained_and_ordered() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("src", "echo_tool", json!({"msg": "x"})),
        {
            let mut node = floe_core::blueprint::NodeSpec::new(
                "each",
                floe_core::blueprint::NodePayload::Loop(floe_core::blueprint::LoopSpec {
                    items_source: "${src.items}".to_string(),
                    body_nodes: vec!["b2".to_string(), "b1".to_string()],
                    max_iterations: 10,
                }),
            );
            node.dependencies.push("src".to_string());
            node
        },
        tool_node("b1", "echo_tool", json!({"msg": "${item}"})),
        tool_node("b2", "echo_tool", json!({"msg": "${b1.text}"})).with_dependency("b1"),
    ]);

    let plan = compile(&blueprint, &registry, &options()).unwrap();
    let each = plan.node("each").unwrap();
    match &each.payload {
        CompiledPayload::Loop { body_order, .. } => {
            assert_eq!(body_order, &vec!["b1".to_string(), "b2".to_string()]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    assert_eq!(plan.node("b1").unwrap().container.as_deref(), Some("each"));
    // Contained nodes never appear in the top-level schedule.
    assert!(plan.levels.iter().flatten().all(|id| id != "b1" && id != "b2"));
}

#[test]
fn test_dependency_on_contained_node_rejected() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("src", "echo_tool", json!({"msg": "x"})),
        {
            let mut node = floe_core::blueprint::NodeSpec::new(
                "each",
                floe_core::blueprint::NodePayload::Loop(floe_core::blueprint::LoopSpec {
                    items_source: "${src.items}".to_string(),
                    body_nodes: vec!["b1".to_string()],
                    max_iterations: 10,
                }),
            );
            node.dependencies.push("src".to_string());
            node
        },
        tool_node("b1", "echo_tool", json!({"msg": "${item}"})),
        tool_node("outside", "echo_tool", json!({})).with_dependency("b1"),
    ]);

    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report.errors().any(|i| i.kind == IssueKind::Containment));
}

#[test]
fn test_items_source_must_be_single_expression() {
    let registry = registry();
    let blueprint = Blueprint::new(vec![
        tool_node("src", "echo_tool", json!({})),
        {
            let mut node = floe_core::blueprint::NodeSpec::new(
                "each",
                floe_core::blueprint::NodePayload::Loop(floe_core::blueprint::LoopSpec {
                    items_source: "items: ${src.items}".to_string(),
                    body_nodes: vec!["b1".to_string()],
                    max_iterations: 10,
                }),
            );
            node.dependencies.push("src".to_string());
            node
        },
        tool_node("b1", "echo_tool", json!({})),
    ]);
    let report = compile(&blueprint, &registry, &options()).unwrap_err();
    assert!(report
        .errors()
        .any(|i| i.kind == IssueKind::TemplateSyntax && i.node.as_deref() == Some("each")));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Blueprint identity is stable under content equality and
        /// sensitive to any content change.
        #[test]
        fn prop_blueprint_identity(msg in "[a-z]{1,16}", other in "[a-z]{1,16}") {
            let a = Blueprint::new(vec![tool_node("n", "echo_tool", json!({"msg": msg}))]);
            let b = Blueprint::new(vec![tool_node("n", "echo_tool", json!({"msg": msg}))]);
            let c = Blueprint::new(vec![tool_node("n", "echo_tool", json!({"msg": other}))]);
            prop_assert_eq!(a.id(), b.id());
            if msg != other {
                prop_assert_ne!(a.id(), c.id());
            }
        }

        /// Every edge in a randomly generated DAG respects level order.
        #[test]
        fn prop_level_soundness(edge_bits in proptest::collection::vec(any::<u8>(), 0..64)) {
            let node_count = 8usize;
            let mut nodes = Vec::new();
            for i in 0..node_count {
                let mut node = tool_node(&format!("n{i}"), "echo_tool", json!({}));
                // Edges only point backwards, so the graph is a DAG by
                // construction.
                for j in 0..i {
                    let bit = edge_bits.get(i * node_count + j).copied().unwrap_or(0);
                    if bit % 3 == 0 {
                        node = node.with_dependency(format!("n{j}"));
                    }
                }
                nodes.push(node);
            }
            let blueprint = Blueprint::new(nodes);
            let plan = compile(&blueprint, &registry(), &options()).unwrap();
            for node in plan.nodes.values() {
                for dep in &node.dependencies {
                    prop_assert!(plan.nodes[dep].level < node.level);
                }
            }
        }
    }
}
