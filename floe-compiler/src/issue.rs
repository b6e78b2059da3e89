//! ABOUTME: Compile issue collection and the aggregated CompileReport
//! ABOUTME: Compilation never throws; it returns every issue found in one pass

use serde::{Deserialize, Serialize};
use std::fmt;

/// How bad an issue is. Warnings survive compilation unless strict mode
/// promotes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// What went wrong, machine-readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Payload,
    DuplicateId,
    ReservedName,
    UnknownDependency,
    SelfDependency,
    IllegalCycle,
    Containment,
    UnknownComponent,
    WorkflowDepthExceeded,
    WorkflowCycle,
    TemplateSyntax,
    UnknownBinding,
    UnboundInput,
    TypeMismatch,
    RecursiveSource,
}

/// A single finding, attributed to a node and (where it applies) a path
/// expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub node: Option<String>,
    pub path: Option<String>,
    pub message: String,
}

impl CompileIssue {
    pub fn error(kind: IssueKind, node: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            node: node.map(str::to_string),
            path: None,
            message: message.into(),
        }
    }

    pub fn warning(kind: IssueKind, node: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            node: node.map(str::to_string),
            path: None,
            message: message.into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for CompileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning")?,
            Severity::Error => write!(f, "error")?,
        }
        if let Some(node) = &self.node {
            write!(f, " [node `{node}`]")?;
        }
        if let Some(path) = &self.path {
            write!(f, " [{path}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Aggregated outcome of a failed (or warning-laden) compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileReport {
    pub issues: Vec<CompileIssue>,
}

impl CompileReport {
    pub fn new(issues: Vec<CompileIssue>) -> Self {
        Self { issues }
    }

    pub fn errors(&self) -> impl Iterator<Item = &CompileIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CompileIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "compilation failed with {} error(s), {} warning(s)",
            self.errors().count(),
            self.warnings().count()
        )?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileReport {}
