//! ABOUTME: Blueprint-to-plan compilation pipeline
//! ABOUTME: Best-effort issue collection; never partially succeeds

use crate::expr::Expr;
use crate::graph;
use crate::issue::{CompileIssue, CompileReport, IssueKind, Severity};
use crate::plan::{
    BindTarget, Binding, CompiledPayload, Plan, PlanNode, PolicySnapshot, RecursiveTarget,
};
use crate::template::{PathRoot, TemplateString, RESERVED_ROOTS};
use floe_core::blueprint::{Blueprint, NodeKind, NodePayload, NodeSpec, DEFAULT_TIMEOUT_MS};
use floe_core::registry::{ComponentKind, ComponentRegistry};
use floe_core::schema::ValueSchema;
use floe_core::types::BlueprintId;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Compiler configuration.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Promote I/O type-check findings from warnings to errors.
    pub strict: bool,
    /// Nesting cap for sub-workflow compilation.
    pub max_workflow_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict: false,
            max_workflow_depth: 8,
        }
    }
}

/// Compile a blueprint against the registry into an executable plan.
///
/// All semantic findings are collected in a single best-effort pass; on any
/// error the full report is returned and no plan exists. Warning-only
/// compilations succeed (warnings are logged).
#[instrument(skip_all, fields(blueprint = %blueprint.id()))]
pub fn compile(
    blueprint: &Blueprint,
    registry: &ComponentRegistry,
    options: &CompileOptions,
) -> Result<Plan, CompileReport> {
    let mut visited = vec![blueprint.id()];
    compile_at_depth(blueprint, registry, options, 0, &mut visited)
}

fn compile_at_depth(
    blueprint: &Blueprint,
    registry: &ComponentRegistry,
    options: &CompileOptions,
    depth: usize,
    visited: &mut Vec<BlueprintId>,
) -> Result<Plan, CompileReport> {
    let blueprint_id = blueprint.id();
    let mut issues: Vec<CompileIssue> = Vec::new();

    // ---- arena over unique ids, blueprint order ----------------------------
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut arena: Vec<&NodeSpec> = Vec::new();
    for node in &blueprint.nodes {
        if index.contains_key(node.id.as_str()) {
            issues.push(CompileIssue::error(
                IssueKind::DuplicateId,
                Some(&node.id),
                format!("node id `{}` declared more than once", node.id),
            ));
            continue;
        }
        if RESERVED_ROOTS.contains(&node.id.as_str()) {
            issues.push(CompileIssue::error(
                IssueKind::ReservedName,
                Some(&node.id),
                format!("`{}` is a reserved binding name", node.id),
            ));
        }
        index.insert(node.id.as_str(), arena.len());
        arena.push(node);
    }
    let n = arena.len();

    // ---- payload sanity and dependency checks ------------------------------
    for &node in &arena {
        check_payload(node, &index, &mut issues);
        for dep in &node.dependencies {
            if !index.contains_key(dep.as_str()) {
                issues.push(CompileIssue::error(
                    IssueKind::UnknownDependency,
                    Some(&node.id),
                    format!("dependency `{dep}` does not exist"),
                ));
            } else if dep == &node.id && !is_self_recursive(node) {
                issues.push(CompileIssue::error(
                    IssueKind::SelfDependency,
                    Some(&node.id),
                    "node depends on itself",
                ));
            }
        }
    }

    // ---- containment -------------------------------------------------------
    let mut container: Vec<Option<usize>> = vec![None; n];
    for (ci, node) in arena.iter().enumerate() {
        let contained: Vec<&String> = match &node.payload {
            NodePayload::Loop(spec) => spec.body_nodes.iter().collect(),
            NodePayload::Parallel(spec) => spec.branches.iter().flatten().collect(),
            _ => continue,
        };
        for member in contained {
            let Some(&mi) = index.get(member.as_str()) else {
                continue; // reported as a payload issue already
            };
            if mi == ci {
                issues.push(CompileIssue::error(
                    IssueKind::Containment,
                    Some(&node.id),
                    "node lists itself in its own body",
                ));
                continue;
            }
            if let Some(previous) = container[mi] {
                issues.push(CompileIssue::error(
                    IssueKind::Containment,
                    Some(member),
                    format!(
                        "node belongs to both `{}` and `{}`",
                        arena[previous].id, node.id
                    ),
                ));
                continue;
            }
            container[mi] = Some(ci);
        }
    }

    // Contained nodes are reachable only through their container.
    for (ni, node) in arena.iter().enumerate() {
        for dep in &node.dependencies {
            let Some(&di) = index.get(dep.as_str()) else {
                continue;
            };
            if let Some(owner) = container[di] {
                if container[ni] != Some(owner) && owner != ni {
                    issues.push(CompileIssue::error(
                        IssueKind::Containment,
                        Some(&node.id),
                        format!(
                            "dependency `{dep}` lives inside `{}` and is not visible here",
                            arena[owner].id
                        ),
                    ));
                }
            }
        }
    }

    // ---- graphs ------------------------------------------------------------
    // Forward edges run dependency → dependent. Container edges lift a body
    // node's external dependencies onto the container so level assignment
    // orders the container after everything its body needs.
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (ni, node) in arena.iter().enumerate() {
        for dep in &node.dependencies {
            if let Some(&di) = index.get(dep.as_str()) {
                adj[di].push(ni);
                if let Some(owner) = container[ni] {
                    if container[di].is_none() && di != owner {
                        adj[di].push(owner);
                    }
                }
            }
        }
    }
    for list in &mut adj {
        list.sort_unstable();
        list.dedup();
    }

    // Cycle legality runs over the graph plus recursion re-entry edges.
    let mut cycle_adj = adj.clone();
    for (ni, node) in arena.iter().enumerate() {
        if let NodePayload::Recursive(spec) = &node.payload {
            for source in &spec.recursive_sources {
                if let Some(&si) = index.get(source.as_str()) {
                    cycle_adj[ni].push(si);
                }
            }
        }
    }
    for list in &mut cycle_adj {
        list.sort_unstable();
        list.dedup();
    }

    let cycle_components = graph::strongly_connected_components(&cycle_adj);
    for component in &cycle_components {
        if !graph::is_cyclic(&cycle_adj, component) {
            continue;
        }
        let permitted = component.iter().all(|&v| {
            arena[v].kind() == NodeKind::Recursive
                || component.iter().any(|&r| match &arena[r].payload {
                    NodePayload::Recursive(spec) => {
                        spec.recursive_sources.iter().any(|s| s == &arena[v].id)
                    }
                    _ => false,
                })
        });
        if !permitted {
            let mut members: Vec<&str> = component.iter().map(|&v| arena[v].id.as_str()).collect();
            members.sort_unstable();
            issues.push(CompileIssue::error(
                IssueKind::IllegalCycle,
                None,
                format!("cycle through [{}] is not a recursion cycle", members.join(", ")),
            ));
        } else {
            // Authored cycle members other than the recursion node itself are
            // driven by the recursion executor, not the top-level scheduler.
            for &v in component {
                if arena[v].kind() != NodeKind::Recursive && container[v].is_none() {
                    if let Some(&r) = component
                        .iter()
                        .find(|&&r| arena[r].kind() == NodeKind::Recursive)
                    {
                        if adj_contains_cycle_edge(&adj, component) {
                            container[v] = Some(r);
                        }
                    }
                }
            }
        }
    }

    // ---- ancestors for binding validation ----------------------------------
    let ancestors = compute_ancestors(&adj);
    let recursion_sources: HashSet<&str> = arena
        .iter()
        .filter_map(|node| match &node.payload {
            NodePayload::Recursive(spec) => Some(spec.recursive_sources.iter()),
            _ => None,
        })
        .flatten()
        .map(String::as_str)
        .collect();

    // ---- per-node payload compilation --------------------------------------
    let mut payloads: Vec<Option<CompiledPayload>> = Vec::with_capacity(n);
    for (ni, &node) in arena.iter().enumerate() {
        let scope = BindingScope {
            arena: arena.as_slice(),
            index: &index,
            container: container.as_slice(),
            ancestors: ancestors.as_slice(),
            recursion_sources: &recursion_sources,
            options,
        };
        let payload = compile_payload(
            node,
            ni,
            registry,
            &scope,
            &adj,
            depth,
            visited,
            &mut issues,
        );
        payloads.push(payload);
    }

    if issues.iter().any(|i| i.severity == Severity::Error) {
        return Err(CompileReport::new(issues));
    }
    for issue in issues.iter().filter(|i| i.severity == Severity::Warning) {
        warn!(%issue, "compile warning");
    }

    // ---- levels over top-level nodes ---------------------------------------
    let components = graph::strongly_connected_components(&adj);
    let raw_levels = graph::assign_levels(&adj, &components);

    let mut distinct: Vec<usize> = (0..n)
        .filter(|&v| container[v].is_none())
        .map(|v| raw_levels[v])
        .collect();
    distinct.sort_unstable();
    distinct.dedup();
    let dense: HashMap<usize, usize> = distinct
        .iter()
        .enumerate()
        .map(|(dense, &raw)| (raw, dense))
        .collect();

    let mut levels: Vec<Vec<String>> = vec![Vec::new(); distinct.len()];
    for (v, node) in arena.iter().enumerate() {
        if container[v].is_none() {
            levels[dense[&raw_levels[v]]].push(node.id.clone());
        }
    }
    for level in &mut levels {
        level.sort_unstable();
    }

    let node_level = |v: usize| -> usize {
        let mut current = v;
        while let Some(owner) = container[current] {
            current = owner;
        }
        dense[&raw_levels[current]]
    };

    let terminal_level_ids: Vec<String> = {
        let mut terminals: Vec<String> = (0..n)
            .filter(|&v| {
                container[v].is_none()
                    && !adj[v].iter().any(|&w| container[w].is_none() && w != v)
            })
            .map(|v| arena[v].id.clone())
            .collect();
        terminals.sort_unstable();
        terminals
    };

    // ---- assembly ----------------------------------------------------------
    let mut nodes: HashMap<String, Arc<PlanNode>> = HashMap::with_capacity(n);
    for (v, (node, payload)) in arena.iter().zip(payloads).enumerate() {
        let payload = payload.unwrap_or_else(|| {
            unreachable!("payload missing for `{}` without a reported error", node.id)
        });
        let output_schema = match node.kind() {
            NodeKind::Llm => Some(
                node.output_schema
                    .clone()
                    .unwrap_or_else(ValueSchema::text),
            ),
            _ => node.output_schema.clone(),
        };
        nodes.insert(
            node.id.clone(),
            Arc::new(PlanNode {
                id: node.id.clone(),
                kind: node.kind(),
                dependencies: node.dependencies.clone(),
                level: node_level(v),
                container: container[v].map(|c| arena[c].id.clone()),
                payload,
                input_schema: node.input_schema.clone(),
                output_schema,
                policy: PolicySnapshot {
                    retry: node.retry_policy.clone().unwrap_or_default(),
                    timeout_ms: node.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                },
            }),
        );
    }

    Ok(Plan {
        blueprint_id,
        entry_level_ids: levels.first().cloned().unwrap_or_default(),
        terminal_level_ids,
        nodes,
        levels,
    })
}

fn is_self_recursive(node: &NodeSpec) -> bool {
    matches!(&node.payload, NodePayload::Recursive(spec)
        if spec.recursive_sources.iter().any(|s| s == &node.id))
}

/// True when the component is cyclic in the authored graph itself (not only
/// through recursion re-entry edges).
fn adj_contains_cycle_edge(adj: &[Vec<usize>], component: &[usize]) -> bool {
    if component.len() < 2 {
        return adj[component[0]].contains(&component[0]);
    }
    let members: HashSet<usize> = component.iter().copied().collect();
    let sub: Vec<usize> = component.to_vec();
    // The authored subgraph is cyclic iff it has no topological order.
    let filtered: Vec<Vec<usize>> = adj
        .iter()
        .map(|targets| {
            targets
                .iter()
                .copied()
                .filter(|t| members.contains(t))
                .collect()
        })
        .collect();
    graph::topo_order_subset(&filtered, &sub).is_none()
}

fn compute_ancestors(adj: &[Vec<usize>]) -> Vec<HashSet<usize>> {
    let n = adj.len();
    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (u, targets) in adj.iter().enumerate() {
        for &w in targets {
            reverse[w].push(u);
        }
    }
    (0..n)
        .map(|start| {
            let mut seen = HashSet::new();
            let mut stack = reverse[start].clone();
            while let Some(v) = stack.pop() {
                if seen.insert(v) {
                    stack.extend(reverse[v].iter().copied());
                }
            }
            seen
        })
        .collect()
}

fn check_payload(node: &NodeSpec, index: &HashMap<&str, usize>, issues: &mut Vec<CompileIssue>) {
    let missing = |issues: &mut Vec<CompileIssue>, what: &str| {
        issues.push(CompileIssue::error(
            IssueKind::Payload,
            Some(&node.id),
            format!("{what} must not be empty"),
        ));
    };
    let check_refs = |issues: &mut Vec<CompileIssue>, ids: &[String], role: &str| {
        for id in ids {
            if !index.contains_key(id.as_str()) {
                issues.push(CompileIssue::error(
                    IssueKind::Payload,
                    Some(&node.id),
                    format!("{role} references unknown node `{id}`"),
                ));
            }
        }
    };

    match &node.payload {
        NodePayload::Tool(spec) => {
            if spec.tool_name.is_empty() {
                missing(issues, "tool_name");
            }
        }
        NodePayload::Llm(spec) => {
            if spec.model.is_empty() {
                missing(issues, "model");
            }
            if spec.prompt_template.is_empty() {
                missing(issues, "prompt_template");
            }
        }
        NodePayload::Agent(spec) => {
            if spec.agent_name.is_empty() {
                missing(issues, "agent_name");
            }
            if spec.max_iterations == 0 {
                missing(issues, "max_iterations");
            }
        }
        NodePayload::Condition(spec) => {
            if spec.expression.is_empty() {
                missing(issues, "expression");
            }
            check_refs(issues, &spec.true_branch, "true_branch");
            check_refs(issues, &spec.false_branch, "false_branch");
        }
        NodePayload::Loop(spec) => {
            if spec.body_nodes.is_empty() {
                missing(issues, "body_nodes");
            }
            if spec.max_iterations == 0 {
                missing(issues, "max_iterations");
            }
            check_refs(issues, &spec.body_nodes, "body_nodes");
        }
        NodePayload::Parallel(spec) => {
            if spec.branches.is_empty() || spec.branches.iter().any(Vec::is_empty) {
                missing(issues, "branches");
            }
            if spec.max_concurrency == 0 {
                missing(issues, "max_concurrency");
            }
            for branch in &spec.branches {
                check_refs(issues, branch, "branches");
            }
        }
        NodePayload::Workflow(spec) => {
            if spec.workflow_ref.is_empty() {
                missing(issues, "workflow_ref");
            }
        }
        NodePayload::Recursive(spec) => {
            if spec.agent_or_workflow_ref.is_empty() {
                missing(issues, "agent_or_workflow_ref");
            }
            if spec.max_iterations == 0 {
                missing(issues, "max_iterations");
            }
            check_refs(issues, &spec.recursive_sources, "recursive_sources");
            for source in &spec.recursive_sources {
                if source != &node.id
                    && index.contains_key(source.as_str())
                    && !node.dependencies.contains(source)
                {
                    issues.push(CompileIssue::error(
                        IssueKind::RecursiveSource,
                        Some(&node.id),
                        format!("recursive source `{source}` must be a direct dependency"),
                    ));
                }
            }
        }
        NodePayload::Code(spec) => {
            if spec.source.is_empty() {
                missing(issues, "source");
            }
        }
    }
}

struct BindingScope<'a> {
    arena: &'a [&'a NodeSpec],
    index: &'a HashMap<&'a str, usize>,
    container: &'a [Option<usize>],
    ancestors: &'a [HashSet<usize>],
    recursion_sources: &'a HashSet<&'a str>,
    options: &'a CompileOptions,
}

impl BindingScope<'_> {
    /// Validate a path root used in a node's template or expression.
    fn check_root(
        &self,
        node_index: usize,
        root: &PathRoot,
        raw: &str,
        issues: &mut Vec<CompileIssue>,
    ) {
        let node = self.arena[node_index];
        match root {
            PathRoot::Inputs => {}
            PathRoot::Item | PathRoot::Index => {
                if !self.inside_loop(node_index) {
                    issues.push(
                        CompileIssue::error(
                            IssueKind::UnknownBinding,
                            Some(&node.id),
                            "`item`/`index` are only bound inside loop bodies",
                        )
                        .with_path(raw),
                    );
                }
            }
            PathRoot::Iteration | PathRoot::Accumulator => {
                issues.push(
                    CompileIssue::error(
                        IssueKind::UnknownBinding,
                        Some(&node.id),
                        "recursion projections are only visible to convergence conditions",
                    )
                    .with_path(raw),
                );
            }
            PathRoot::RecursiveContext => {
                if !self.recursion_sources.contains(node.id.as_str()) {
                    issues.push(
                        CompileIssue::error(
                            IssueKind::UnknownBinding,
                            Some(&node.id),
                            "`recursive_context` is only bound for recursion sources",
                        )
                        .with_path(raw),
                    );
                }
            }
            PathRoot::Node(id) => {
                if !self.is_visible_upstream(node_index, id) {
                    issues.push(
                        CompileIssue::error(
                            IssueKind::UnknownBinding,
                            Some(&node.id),
                            format!("`{id}` is not a visible upstream node"),
                        )
                        .with_path(raw),
                    );
                }
            }
        }
    }

    fn inside_loop(&self, mut node_index: usize) -> bool {
        while let Some(owner) = self.container[node_index] {
            if matches!(self.arena[owner].payload, NodePayload::Loop(_)) {
                return true;
            }
            node_index = owner;
        }
        false
    }

    fn is_visible_upstream(&self, node_index: usize, root: &str) -> bool {
        let Some(&ri) = self.index.get(root) else {
            return false;
        };
        if self.ancestors[node_index].contains(&ri) {
            return true;
        }
        // Bodymates of the same container resolve through the scoped
        // context, and anything upstream of an enclosing container is
        // visible through the parent context.
        let mut current = node_index;
        while let Some(owner) = self.container[current] {
            if self.container[ri] == Some(owner) {
                return true;
            }
            if ri == owner {
                return false;
            }
            if self.ancestors[owner].contains(&ri) {
                return true;
            }
            current = owner;
        }
        false
    }

    /// Output-vs-input type check; warnings unless strict mode is on.
    fn check_types(
        &self,
        node_index: usize,
        field: &str,
        template: &TemplateString,
        issues: &mut Vec<CompileIssue>,
    ) {
        let node = self.arena[node_index];
        let Some(input_schema) = &node.input_schema else {
            return;
        };
        let Some(expected) = input_schema.get(field) else {
            return;
        };
        let Some(expr) = template.single_expr() else {
            return;
        };
        let Some(upstream_id) = expr.root.node_id() else {
            return;
        };
        let Some(&ui) = self.index.get(upstream_id) else {
            return;
        };
        let Some(output_schema) = &self.arena[ui].output_schema else {
            return;
        };
        let Some(first_field) = expr.first_field() else {
            return;
        };
        let severity = if self.options.strict {
            Severity::Error
        } else {
            Severity::Warning
        };
        let mut push = |message: String| {
            issues.push(CompileIssue {
                severity,
                kind: IssueKind::TypeMismatch,
                node: Some(node.id.clone()),
                path: Some(expr.to_string()),
                message,
            });
        };
        match output_schema.get(first_field) {
            None => push(format!(
                "`{upstream_id}` does not declare output field `{first_field}`"
            )),
            Some(actual)
                if expr.accessors.len() == 1
                    && actual != expected
                    && actual != floe_core::schema::ValueType::Any
                    && expected != floe_core::schema::ValueType::Any =>
            {
                push(format!(
                    "`{field}` expects {}, `{upstream_id}.{first_field}` declares {}",
                    expected.as_str(),
                    actual.as_str()
                ));
            }
            Some(_) => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_payload(
    node: &NodeSpec,
    node_index: usize,
    registry: &ComponentRegistry,
    scope: &BindingScope<'_>,
    adj: &[Vec<usize>],
    depth: usize,
    visited: &mut Vec<BlueprintId>,
    issues: &mut Vec<CompileIssue>,
) -> Option<CompiledPayload> {
    let resolve = |kind: ComponentKind, name: &str, issues: &mut Vec<CompileIssue>| {
        registry.resolve(kind, name).map_err(|_| {
            issues.push(CompileIssue::error(
                IssueKind::UnknownComponent,
                Some(&node.id),
                format!("no {kind} named `{name}` is registered"),
            ));
        })
    };

    match &node.payload {
        NodePayload::Tool(spec) => {
            let factory = resolve(ComponentKind::Tool, &spec.tool_name, issues).ok();
            let bindings =
                compile_arg_bindings(node, node_index, &spec.tool_args, scope, issues);
            check_bound_inputs(node, &spec.tool_args, issues);
            Some(CompiledPayload::Tool {
                factory: factory?,
                literal_args: spec.tool_args.clone(),
                bindings,
            })
        }
        NodePayload::Llm(spec) => {
            let provider = resolve(ComponentKind::LlmProvider, &spec.model, issues).ok();
            let prompt = match TemplateString::parse(&spec.prompt_template) {
                Ok(template) => {
                    for expr in template.exprs() {
                        scope.check_root(node_index, &expr.root, expr.raw(), issues);
                    }
                    Some(template)
                }
                Err(e) => {
                    issues.push(
                        CompileIssue::error(IssueKind::TemplateSyntax, Some(&node.id), e.to_string())
                            .with_path(&spec.prompt_template),
                    );
                    None
                }
            };
            Some(CompiledPayload::Llm {
                provider: provider?,
                model: spec.model.clone(),
                prompt: prompt?,
                config: spec.llm_config.clone(),
            })
        }
        NodePayload::Agent(spec) => {
            let factory = resolve(ComponentKind::Agent, &spec.agent_name, issues).ok();
            for tool in &spec.tools {
                if !registry.contains(ComponentKind::Tool, tool) {
                    issues.push(CompileIssue::warning(
                        IssueKind::UnknownComponent,
                        Some(&node.id),
                        format!("agent tool `{tool}` is not registered"),
                    ));
                }
            }
            Some(CompiledPayload::Agent {
                factory: factory?,
                tools: spec.tools.clone(),
                max_iterations: spec.max_iterations,
            })
        }
        NodePayload::Condition(spec) => {
            let expression = compile_expression(
                node,
                node_index,
                &spec.expression,
                scope,
                ExpressionPosition::Condition,
                issues,
            );
            Some(CompiledPayload::Condition {
                expression: expression?,
                true_branch: spec.true_branch.clone(),
                false_branch: spec.false_branch.clone(),
            })
        }
        NodePayload::Loop(spec) => {
            let items_source = match TemplateString::parse(&spec.items_source) {
                Ok(template) if template.single_expr().is_some() => {
                    for expr in template.exprs() {
                        scope.check_root(node_index, &expr.root, expr.raw(), issues);
                    }
                    Some(template)
                }
                Ok(_) => {
                    issues.push(
                        CompileIssue::error(
                            IssueKind::TemplateSyntax,
                            Some(&node.id),
                            "items_source must be a single `${...}` expression",
                        )
                        .with_path(&spec.items_source),
                    );
                    None
                }
                Err(e) => {
                    issues.push(
                        CompileIssue::error(IssueKind::TemplateSyntax, Some(&node.id), e.to_string())
                            .with_path(&spec.items_source),
                    );
                    None
                }
            };
            let body_order = order_body(node, &spec.body_nodes, scope, adj, issues);
            Some(CompiledPayload::Loop {
                items_source: items_source?,
                body_order: body_order?,
                max_iterations: spec.max_iterations,
            })
        }
        NodePayload::Parallel(spec) => Some(CompiledPayload::Parallel {
            branches: spec.branches.clone(),
            max_concurrency: spec.max_concurrency,
        }),
        NodePayload::Workflow(spec) => {
            let plan = compile_sub_workflow(
                node,
                &spec.workflow_ref,
                registry,
                scope.options,
                depth,
                visited,
                issues,
            );
            Some(CompiledPayload::Workflow {
                plan: plan?,
                config_overrides: spec.config_overrides.clone(),
            })
        }
        NodePayload::Recursive(spec) => {
            let target = match registry.resolve(ComponentKind::Agent, &spec.agent_or_workflow_ref)
            {
                Ok(handle) => Some(RecursiveTarget::Agent(handle)),
                Err(_) if registry.contains(ComponentKind::Workflow, &spec.agent_or_workflow_ref) => {
                    compile_sub_workflow(
                        node,
                        &spec.agent_or_workflow_ref,
                        registry,
                        scope.options,
                        depth,
                        visited,
                        issues,
                    )
                    .map(RecursiveTarget::Workflow)
                }
                Err(_) => {
                    issues.push(CompileIssue::error(
                        IssueKind::UnknownComponent,
                        Some(&node.id),
                        format!(
                            "`{}` is neither a registered agent nor workflow",
                            spec.agent_or_workflow_ref
                        ),
                    ));
                    None
                }
            };
            let convergence = compile_expression(
                node,
                node_index,
                &spec.convergence_condition,
                scope,
                ExpressionPosition::Convergence,
                issues,
            );
            Some(CompiledPayload::Recursive {
                target: target?,
                sources: spec.recursive_sources.clone(),
                convergence: convergence?,
                max_iterations: spec.max_iterations,
                preserve_context: spec.preserve_context,
            })
        }
        NodePayload::Code(spec) => Some(CompiledPayload::Code {
            source: spec.source.clone(),
            language: node
                .metadata
                .get("language")
                .and_then(Value::as_str)
                .unwrap_or("python")
                .to_string(),
            allowed_imports: spec.allowed_imports.clone(),
            limits: spec.resource_limits.clone(),
        }),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ExpressionPosition {
    Condition,
    Convergence,
}

fn compile_expression(
    node: &NodeSpec,
    node_index: usize,
    raw: &str,
    scope: &BindingScope<'_>,
    position: ExpressionPosition,
    issues: &mut Vec<CompileIssue>,
) -> Option<Expr> {
    match Expr::parse(raw) {
        Ok(expr) => {
            for path in expr.paths() {
                match (position, &path.root) {
                    (
                        ExpressionPosition::Convergence,
                        PathRoot::Iteration | PathRoot::Accumulator | PathRoot::RecursiveContext,
                    ) => {}
                    (ExpressionPosition::Convergence, _) => {
                        issues.push(
                            CompileIssue::error(
                                IssueKind::UnknownBinding,
                                Some(&node.id),
                                format!(
                                    "convergence conditions only see iteration/accumulator/recursive_context, not `{}`",
                                    path.raw()
                                ),
                            )
                            .with_path(path.raw()),
                        );
                    }
                    (ExpressionPosition::Condition, root) => {
                        scope.check_root(node_index, root, path.raw(), issues);
                    }
                }
            }
            Some(expr)
        }
        Err(e) => {
            issues.push(
                CompileIssue::error(IssueKind::TemplateSyntax, Some(&node.id), e.to_string())
                    .with_path(raw),
            );
            None
        }
    }
}

fn compile_sub_workflow(
    node: &NodeSpec,
    workflow_ref: &str,
    registry: &ComponentRegistry,
    options: &CompileOptions,
    depth: usize,
    visited: &mut Vec<BlueprintId>,
    issues: &mut Vec<CompileIssue>,
) -> Option<Arc<Plan>> {
    let handle = match registry.resolve(ComponentKind::Workflow, workflow_ref) {
        Ok(handle) => handle,
        Err(_) => {
            issues.push(CompileIssue::error(
                IssueKind::UnknownComponent,
                Some(&node.id),
                format!("no workflow named `{workflow_ref}` is registered"),
            ));
            return None;
        }
    };
    let blueprint = handle.blueprint().ok()?;
    let sub_id = blueprint.id();

    if depth + 1 >= options.max_workflow_depth {
        issues.push(CompileIssue::error(
            IssueKind::WorkflowDepthExceeded,
            Some(&node.id),
            format!(
                "sub-workflow nesting exceeds the depth cap of {}",
                options.max_workflow_depth
            ),
        ));
        return None;
    }
    if visited.contains(&sub_id) {
        issues.push(CompileIssue::error(
            IssueKind::WorkflowCycle,
            Some(&node.id),
            format!("workflow `{workflow_ref}` is already on the compilation path"),
        ));
        return None;
    }

    visited.push(sub_id);
    let compiled = compile_at_depth(&blueprint, registry, options, depth + 1, visited);
    visited.pop();

    match compiled {
        Ok(plan) => Some(Arc::new(plan)),
        Err(report) => {
            for sub_issue in report.issues {
                let mut lifted = sub_issue;
                lifted.message = format!(
                    "in workflow `{workflow_ref}`{}: {}",
                    lifted
                        .node
                        .as_deref()
                        .map(|n| format!(" node `{n}`"))
                        .unwrap_or_default(),
                    lifted.message
                );
                lifted.node = Some(node.id.clone());
                issues.push(lifted);
            }
            None
        }
    }
}

/// Walk the argument object, compiling every string containing `${` into a
/// binding. Non-template strings are left as literals.
fn compile_arg_bindings(
    node: &NodeSpec,
    node_index: usize,
    args: &Map<String, Value>,
    scope: &BindingScope<'_>,
    issues: &mut Vec<CompileIssue>,
) -> Vec<Binding> {
    let mut bindings = Vec::new();
    let mut path = Vec::new();
    for (key, value) in args {
        path.push(BindTarget::Key(key.clone()));
        walk_arg(node, node_index, value, scope, &mut path, &mut bindings, issues);
        path.pop();
    }
    bindings
}

fn walk_arg(
    node: &NodeSpec,
    node_index: usize,
    value: &Value,
    scope: &BindingScope<'_>,
    path: &mut Vec<BindTarget>,
    bindings: &mut Vec<Binding>,
    issues: &mut Vec<CompileIssue>,
) {
    match value {
        Value::String(raw) if raw.contains("${") => match TemplateString::parse(raw) {
            Ok(template) => {
                for expr in template.exprs() {
                    scope.check_root(node_index, &expr.root, expr.raw(), issues);
                }
                if let [BindTarget::Key(field)] = path.as_slice() {
                    scope.check_types(node_index, field, &template, issues);
                }
                bindings.push(Binding {
                    target: path.clone(),
                    template,
                });
            }
            Err(e) => {
                issues.push(
                    CompileIssue::error(IssueKind::TemplateSyntax, Some(&node.id), e.to_string())
                        .with_path(raw),
                );
            }
        },
        Value::Object(map) => {
            for (key, inner) in map {
                path.push(BindTarget::Key(key.clone()));
                walk_arg(node, node_index, inner, scope, path, bindings, issues);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, inner) in items.iter().enumerate() {
                path.push(BindTarget::Index(i));
                walk_arg(node, node_index, inner, scope, path, bindings, issues);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Invariant: every declared input is either a key in the payload arguments
/// (literal or template) or nothing binds it at all, which is an error.
fn check_bound_inputs(node: &NodeSpec, args: &Map<String, Value>, issues: &mut Vec<CompileIssue>) {
    let Some(schema) = &node.input_schema else {
        return;
    };
    for (field, _) in schema.fields() {
        if !args.contains_key(field) {
            issues.push(CompileIssue::error(
                IssueKind::UnboundInput,
                Some(&node.id),
                format!("declared input `{field}` is neither bound nor supplied"),
            ));
        }
    }
}

fn order_body(
    node: &NodeSpec,
    body_nodes: &[String],
    scope: &BindingScope<'_>,
    adj: &[Vec<usize>],
    issues: &mut Vec<CompileIssue>,
) -> Option<Vec<String>> {
    let mut subset = Vec::with_capacity(body_nodes.len());
    for member in body_nodes {
        match scope.index.get(member.as_str()) {
            Some(&mi) => subset.push(mi),
            None => return None, // reported in payload checks
        }
    }
    match graph::topo_order_subset(adj, &subset) {
        Some(order) => Some(
            order
                .into_iter()
                .map(|v| scope.arena[v].id.clone())
                .collect(),
        ),
        None => {
            issues.push(CompileIssue::error(
                IssueKind::Containment,
                Some(&node.id),
                "loop body contains a dependency cycle",
            ));
            None
        }
    }
}
