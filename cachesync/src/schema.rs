use serde_json::Value;
use shared::{Error, Result};
use std::collections::BTreeMap;

/// JSON shape a persisted key is declared with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Null => value.is_null(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Number => value.is_number(),
            ValueKind::String => value.is_string(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
        }
    }

    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PersistField {
    pub kind: ValueKind,
    pub default: Value,
}

/// Closed set of keys the persist layer accepts, each with a kind and a default
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistSchema {
    fields: BTreeMap<String, PersistField>,
}

impl PersistSchema {
    pub fn builder() -> PersistSchemaBuilder {
        PersistSchemaBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Field for `key`, or a schema violation if it was never declared
    pub fn require(&self, key: &str) -> Result<&PersistField> {
        self.fields.get(key).ok_or_else(|| {
            Error::SchemaViolation(format!("persist key '{}' is not declared", key))
        })
    }

    pub fn validate(&self, key: &str, value: &Value) -> Result<()> {
        let field = self.require(key)?;
        if !field.kind.matches(value) {
            return Err(Error::SchemaViolation(format!(
                "persist key '{}' expects {:?}, got {:?}",
                key,
                field.kind,
                ValueKind::of(value)
            )));
        }
        Ok(())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &PersistField)> {
        self.fields.iter().map(|(key, field)| (key.as_str(), field))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PersistSchemaBuilder {
    fields: BTreeMap<String, PersistField>,
    errors: Vec<String>,
}

impl PersistSchemaBuilder {
    pub fn declare(mut self, key: impl Into<String>, kind: ValueKind, default: Value) -> Self {
        let key = key.into();
        if !kind.matches(&default) {
            self.errors
                .push(format!("default for '{}' is not a {:?}", key, kind));
        }
        if self.fields.contains_key(&key) {
            self.errors.push(format!("'{}' is declared twice", key));
        }
        self.fields.insert(key, PersistField { kind, default });
        self
    }

    pub fn build(self) -> Result<PersistSchema> {
        if !self.errors.is_empty() {
            return Err(Error::SchemaViolation(self.errors.join("; ")));
        }
        Ok(PersistSchema {
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> PersistSchema {
        PersistSchema::builder()
            .declare("example-1", ValueKind::String, json!("example-1"))
            .declare("example-2", ValueKind::Number, json!(1))
            .declare("example-4", ValueKind::Object, json!({"a": "x", "b": 4, "c": false}))
            .build()
            .unwrap()
    }

    #[test]
    fn test_validate_accepts_declared_kind() {
        let schema = schema();
        assert!(schema.validate("example-2", &json!(42)).is_ok());
        assert_eq!(schema.len(), 3);
    }

    #[test]
    fn test_validate_rejects_undeclared_and_mismatched() {
        let schema = schema();
        assert!(matches!(
            schema.validate("undeclared", &json!(1)),
            Err(Error::SchemaViolation(_))
        ));
        assert!(matches!(
            schema.validate("example-1", &json!(1)),
            Err(Error::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_builder_rejects_bad_defaults_and_duplicates() {
        let result = PersistSchema::builder()
            .declare("flag", ValueKind::Bool, json!("yes"))
            .declare("n", ValueKind::Number, json!(1))
            .declare("n", ValueKind::Number, json!(2))
            .build();
        match result {
            Err(Error::SchemaViolation(msg)) => {
                assert!(msg.contains("flag"));
                assert!(msg.contains("declared twice"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
