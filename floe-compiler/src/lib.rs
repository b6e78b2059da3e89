//! ABOUTME: Blueprint validation and plan compilation for rs-floe
//! ABOUTME: Turns declarative graphs into level-assigned executable plans

pub mod compile;
pub mod expr;
pub mod graph;
pub mod issue;
pub mod plan;
pub mod template;

// Re-export the public surface
pub use compile::{compile, CompileOptions};
pub use expr::{BinaryOp, Expr, ExprError, Literal};
pub use issue::{CompileIssue, CompileReport, IssueKind, Severity};
pub use plan::{
    BindTarget, Binding, CompiledPayload, Plan, PlanNode, PolicySnapshot, RecursiveTarget,
};
pub use template::{Accessor, PathExpr, PathRoot, Segment, TemplateError, TemplateString};
