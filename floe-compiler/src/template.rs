//! ABOUTME: Template strings of the form `literal ${path} literal ...`
//! ABOUTME: Parsed once at compile time; the engine only walks the AST

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Names reserved for built-in bindings; node ids must not collide.
pub const RESERVED_ROOTS: &[&str] = &[
    "inputs",
    "item",
    "index",
    "iteration",
    "accumulator",
    "recursive_context",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated `${{` at offset {0}")]
    Unterminated(usize),
    #[error("empty expression at offset {0}")]
    EmptyExpression(usize),
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Where a path expression starts resolving.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathRoot {
    /// An upstream node's published output.
    Node(String),
    /// The run's initial inputs.
    Inputs,
    /// Current loop item.
    Item,
    /// Current loop index.
    Index,
    /// Recursion iteration counter (convergence expressions only).
    Iteration,
    /// Recursion accumulator (convergence expressions only).
    Accumulator,
    /// Carried recursion context (convergence and recursion bodies).
    RecursiveContext,
}

impl PathRoot {
    fn classify(ident: &str) -> Self {
        match ident {
            "inputs" => Self::Inputs,
            "item" => Self::Item,
            "index" => Self::Index,
            "iteration" => Self::Iteration,
            "accumulator" => Self::Accumulator,
            "recursive_context" => Self::RecursiveContext,
            other => Self::Node(other.to_string()),
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Node(id) => Some(id),
            _ => None,
        }
    }
}

/// One step into a resolved value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accessor {
    Field(String),
    Index(usize),
    Key(String),
}

/// A parsed `root(.field | [index] | ["key"])*` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathExpr {
    pub root: PathRoot,
    pub accessors: Vec<Accessor>,
    raw: String,
}

impl PathExpr {
    /// Parse a bare path (the text between `${` and `}`).
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(TemplateError::EmptyExpression(0));
        }
        let invalid = |reason: &str| TemplateError::InvalidPath {
            path: text.to_string(),
            reason: reason.to_string(),
        };

        let bytes = text.as_bytes();
        let mut pos = 0;
        let root_ident = scan_ident(bytes, &mut pos).ok_or_else(|| invalid("expected identifier"))?;
        let mut accessors = Vec::new();

        while pos < bytes.len() {
            match bytes[pos] {
                b'.' => {
                    pos += 1;
                    let field =
                        scan_ident(bytes, &mut pos).ok_or_else(|| invalid("expected field after `.`"))?;
                    accessors.push(Accessor::Field(field));
                }
                b'[' => {
                    pos += 1;
                    if pos >= bytes.len() {
                        return Err(invalid("unterminated `[`"));
                    }
                    match bytes[pos] {
                        b'"' | b'\'' => {
                            let quote = bytes[pos];
                            pos += 1;
                            let start = pos;
                            while pos < bytes.len() && bytes[pos] != quote {
                                pos += 1;
                            }
                            if pos >= bytes.len() {
                                return Err(invalid("unterminated quoted key"));
                            }
                            let key = text[start..pos].to_string();
                            pos += 1;
                            if pos >= bytes.len() || bytes[pos] != b']' {
                                return Err(invalid("expected `]` after quoted key"));
                            }
                            pos += 1;
                            accessors.push(Accessor::Key(key));
                        }
                        b'0'..=b'9' => {
                            let start = pos;
                            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                                pos += 1;
                            }
                            if pos >= bytes.len() || bytes[pos] != b']' {
                                return Err(invalid("expected `]` after index"));
                            }
                            let index: usize = text[start..pos]
                                .parse()
                                .map_err(|_| invalid("index out of range"))?;
                            pos += 1;
                            accessors.push(Accessor::Index(index));
                        }
                        _ => return Err(invalid("expected integer or quoted key in `[...]`")),
                    }
                }
                _ => return Err(invalid("unexpected character in path")),
            }
        }

        Ok(Self {
            root: PathRoot::classify(&root_ident),
            accessors,
            raw: text.to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The first field accessor, when the path is `root.field...`. Used by
    /// compile-time output-schema checks.
    pub fn first_field(&self) -> Option<&str> {
        match self.accessors.first() {
            Some(Accessor::Field(name) | Accessor::Key(name)) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}}}", self.raw)
    }
}

fn scan_ident(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let start = *pos;
    if *pos >= bytes.len() {
        return None;
    }
    let first = bytes[*pos];
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    *pos += 1;
    while *pos < bytes.len() {
        let b = bytes[*pos];
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            *pos += 1;
        } else {
            break;
        }
    }
    Some(String::from_utf8_lossy(&bytes[start..*pos]).into_owned())
}

/// A literal/expression segment of a template string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Literal(String),
    Expr(PathExpr),
}

/// A template string, parsed once into segments.
///
/// # Examples
///
/// ```
/// use floe_compiler::template::TemplateString;
///
/// let template = TemplateString::parse("say: ${n1.text}").unwrap();
/// assert_eq!(template.exprs().count(), 1);
/// assert!(template.single_expr().is_none()); // mixed literal + expression
///
/// let single = TemplateString::parse("${n1.items}").unwrap();
/// assert!(single.single_expr().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateString {
    raw: String,
    segments: Vec<Segment>,
}

impl TemplateString {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;
        let mut offset = 0;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let expr_start = offset + start + 2;
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or(TemplateError::Unterminated(offset + start))?;
            let body = &after[..end];
            if body.trim().is_empty() {
                return Err(TemplateError::EmptyExpression(expr_start));
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Expr(PathExpr::parse(body)?));
            rest = &after[end + 1..];
            offset = expr_start + end + 1;
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn exprs(&self) -> impl Iterator<Item = &PathExpr> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Expr(expr) => Some(expr),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_exprs(&self) -> bool {
        self.exprs().next().is_some()
    }

    /// When the whole template is exactly one expression, return it. Such
    /// templates bind to the referenced value itself rather than a rendered
    /// string.
    pub fn single_expr(&self) -> Option<&PathExpr> {
        match self.segments.as_slice() {
            [Segment::Expr(expr)] => Some(expr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_template() {
        let template = TemplateString::parse("say: ${n1.text}!").unwrap();
        assert_eq!(template.segments().len(), 3);
        let expr = template.exprs().next().unwrap();
        assert_eq!(expr.root, PathRoot::Node("n1".to_string()));
        assert_eq!(expr.accessors, vec![Accessor::Field("text".to_string())]);
    }

    #[test]
    fn test_parse_pure_literal() {
        let template = TemplateString::parse("no placeholders here").unwrap();
        assert!(!template.has_exprs());
        assert_eq!(template.segments().len(), 1);
    }

    #[test]
    fn test_single_expr_detection() {
        assert!(TemplateString::parse("${n1.items}")
            .unwrap()
            .single_expr()
            .is_some());
        assert!(TemplateString::parse(" ${n1.items}")
            .unwrap()
            .single_expr()
            .is_none());
    }

    #[test]
    fn test_builtin_roots() {
        for (text, root) in [
            ("${inputs.query}", PathRoot::Inputs),
            ("${item}", PathRoot::Item),
            ("${index}", PathRoot::Index),
            ("${iteration}", PathRoot::Iteration),
            ("${accumulator.score}", PathRoot::Accumulator),
            ("${recursive_context.last}", PathRoot::RecursiveContext),
        ] {
            let template = TemplateString::parse(text).unwrap();
            assert_eq!(template.exprs().next().unwrap().root, root, "{text}");
        }
    }

    #[test]
    fn test_index_and_key_accessors() {
        let expr = PathExpr::parse("n1.items[2][\"nested key\"].value").unwrap();
        assert_eq!(
            expr.accessors,
            vec![
                Accessor::Field("items".to_string()),
                Accessor::Index(2),
                Accessor::Key("nested key".to_string()),
                Accessor::Field("value".to_string()),
            ]
        );
    }

    #[test]
    fn test_unterminated_expression() {
        assert!(matches!(
            TemplateString::parse("broken ${n1.text"),
            Err(TemplateError::Unterminated(_))
        ));
    }

    #[test]
    fn test_empty_expression() {
        assert!(matches!(
            TemplateString::parse("${  }"),
            Err(TemplateError::EmptyExpression(_))
        ));
    }

    #[test]
    fn test_invalid_paths() {
        assert!(PathExpr::parse("1leading").is_err());
        assert!(PathExpr::parse("a..b").is_err());
        assert!(PathExpr::parse("a[").is_err());
        assert!(PathExpr::parse("a[x]").is_err());
        assert!(PathExpr::parse("a.b c").is_err());
    }

    #[test]
    fn test_dashed_node_ids() {
        let expr = PathExpr::parse("fetch-page.status").unwrap();
        assert_eq!(expr.root, PathRoot::Node("fetch-page".to_string()));
    }
}
