//! ABOUTME: Deterministic stub components and builders for rs-floe tests
//! ABOUTME: Echo/flaky/sleep tools, scripted agents, stub providers, sinks

pub mod builder;
pub mod components;

pub use builder::{agent_node, condition_node, llm_node, recursive_node, tool_node, workflow_node};
pub use components::{
    CollectingSink, EchoProviderFactory, EchoSandbox, EchoToolFactory, FailingToolFactory,
    FixedCostEstimator, FlakyToolFactory, ScriptedAgentFactory, ScriptedToolFactory,
    SleepToolFactory,
};
