//! ABOUTME: Declared input/output schemas for nodes
//! ABOUTME: Name-to-type mappings with structural validation, no coercion

use crate::error::{FloeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Primitive type a declared field may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ValueType {
    /// Structural check only; no coercion is attempted.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

/// Declared schema: an ordered mapping from field names to types.
///
/// Every declared field is required. The backing map is a `BTreeMap` so
/// serialization is deterministic, which keeps blueprint identities stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueSchema(BTreeMap<String, ValueType>);

impl ValueSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default schema for LLM node output: `{text: string}`.
    pub fn text() -> Self {
        Self::new().with("text", ValueType::String)
    }

    pub fn with(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.0.insert(name.into(), ty);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<ValueType> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, ValueType)> {
        self.0.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// Validate an object against this schema.
    ///
    /// Missing declared fields and type mismatches are validation errors.
    /// Extra fields are permitted.
    pub fn validate(&self, object: &Map<String, Value>) -> Result<()> {
        for (name, ty) in &self.0 {
            match object.get(name) {
                None => {
                    return Err(FloeError::Validation {
                        message: format!("missing required field `{name}`"),
                        field: Some(name.clone()),
                    });
                }
                Some(value) if !ty.matches(value) => {
                    return Err(FloeError::Validation {
                        message: format!(
                            "field `{name}` expected {}, got {}",
                            ty.as_str(),
                            json_type_name(value)
                        ),
                        field: Some(name.clone()),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_accepts_matching_object() {
        let schema = ValueSchema::new()
            .with("name", ValueType::String)
            .with("count", ValueType::Integer);
        let input = obj(json!({"name": "a", "count": 3, "extra": true}));
        assert!(schema.validate(&input).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_field() {
        let schema = ValueSchema::new().with("name", ValueType::String);
        let err = schema.validate(&obj(json!({}))).unwrap_err();
        assert!(err.to_string().contains("missing required field"));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let schema = ValueSchema::new().with("count", ValueType::Integer);
        let err = schema.validate(&obj(json!({"count": "three"}))).unwrap_err();
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_integer_does_not_match_float() {
        assert!(ValueType::Integer.matches(&json!(3)));
        assert!(!ValueType::Integer.matches(&json!(3.5)));
        assert!(ValueType::Number.matches(&json!(3.5)));
    }

    #[test]
    fn test_any_matches_everything() {
        for value in [json!(null), json!(1), json!("s"), json!([]), json!({})] {
            assert!(ValueType::Any.matches(&value));
        }
    }

    #[test]
    fn test_text_default() {
        let schema = ValueSchema::text();
        assert_eq!(schema.get("text"), Some(ValueType::String));
        assert!(schema.validate(&obj(json!({"text": "hi"}))).is_ok());
    }

    #[test]
    fn test_schema_serialization_is_sorted() {
        let schema = ValueSchema::new()
            .with("zeta", ValueType::Any)
            .with("alpha", ValueType::Boolean);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.find("alpha").unwrap() < json.find("zeta").unwrap());
    }
}
