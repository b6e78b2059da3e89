//! ABOUTME: Shorthand constructors for blueprint nodes in tests
//! ABOUTME: Keeps test blueprints readable without raw JSON everywhere

use floe_core::blueprint::{
    AgentSpec, ConditionSpec, LlmSpec, NodePayload, NodeSpec, RecursiveSpec, ToolSpec,
    WorkflowSpec,
};
use serde_json::{Map, Value};

fn as_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// `tool` node with literal/template args.
pub fn tool_node(id: &str, tool_name: &str, tool_args: Value) -> NodeSpec {
    NodeSpec::new(
        id,
        NodePayload::Tool(ToolSpec {
            tool_name: tool_name.to_string(),
            tool_args: as_object(tool_args),
        }),
    )
}

/// `llm` node with an empty provider config.
pub fn llm_node(id: &str, model: &str, prompt_template: &str) -> NodeSpec {
    NodeSpec::new(
        id,
        NodePayload::Llm(LlmSpec {
            model: model.to_string(),
            prompt_template: prompt_template.to_string(),
            llm_config: Map::new(),
        }),
    )
}

/// `agent` node with the given tool whitelist.
pub fn agent_node(id: &str, agent_name: &str, tools: &[&str], max_iterations: u32) -> NodeSpec {
    NodeSpec::new(
        id,
        NodePayload::Agent(AgentSpec {
            agent_name: agent_name.to_string(),
            tools: tools.iter().map(|s| (*s).to_string()).collect(),
            max_iterations,
        }),
    )
}

/// `condition` node over two branches.
pub fn condition_node(
    id: &str,
    expression: &str,
    true_branch: &[&str],
    false_branch: &[&str],
) -> NodeSpec {
    NodeSpec::new(
        id,
        NodePayload::Condition(ConditionSpec {
            expression: expression.to_string(),
            true_branch: true_branch.iter().map(|s| (*s).to_string()).collect(),
            false_branch: false_branch.iter().map(|s| (*s).to_string()).collect(),
        }),
    )
}

/// `workflow` node referencing a registered sub-workflow.
pub fn workflow_node(id: &str, workflow_ref: &str, config_overrides: Value) -> NodeSpec {
    NodeSpec::new(
        id,
        NodePayload::Workflow(WorkflowSpec {
            workflow_ref: workflow_ref.to_string(),
            config_overrides: as_object(config_overrides),
        }),
    )
}

/// `recursive` node re-entering the named sources.
pub fn recursive_node(
    id: &str,
    reference: &str,
    sources: &[&str],
    convergence_condition: &str,
    max_iterations: u32,
) -> NodeSpec {
    let mut node = NodeSpec::new(
        id,
        NodePayload::Recursive(RecursiveSpec {
            agent_or_workflow_ref: reference.to_string(),
            recursive_sources: sources.iter().map(|s| (*s).to_string()).collect(),
            convergence_condition: convergence_condition.to_string(),
            max_iterations,
            preserve_context: false,
        }),
    );
    for source in sources {
        node = node.with_dependency(*source);
    }
    node
}
