//! Declarative input schemas for actions, checked before any side effect happens.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    /// A string, or a non-empty list of strings (one is picked per send).
    Text,
    /// A list with at least `min` items.
    List { min: usize },
    Object,
    Number,
    Bool,
}

impl FieldKind {
    fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Text => "string | string[]",
            FieldKind::List { .. } => "array",
            FieldKind::Object => "object",
            FieldKind::Number => "number",
            FieldKind::Bool => "boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

impl Field {
    pub fn required(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }

    fn check(&self, value: &Value) -> Result<(), ValidationError> {
        let err = |reason: String| ValidationError::new(self.name, reason);
        match (self.kind, value) {
            (FieldKind::String, Value::String(_)) => Ok(()),
            (FieldKind::Text, Value::String(_)) => Ok(()),
            (FieldKind::Text, Value::Array(items)) => {
                if items.is_empty() {
                    return Err(err("expected at least one text".to_string()));
                }
                if items.iter().all(Value::is_string) {
                    Ok(())
                } else {
                    Err(err("expected a list of strings".to_string()))
                }
            }
            (FieldKind::List { min }, Value::Array(items)) => {
                if items.len() < min {
                    Err(err(format!(
                        "expected at least {} item(s), got {}",
                        min,
                        items.len()
                    )))
                } else {
                    Ok(())
                }
            }
            (FieldKind::Object, Value::Object(_)) => Ok(()),
            (FieldKind::Number, Value::Number(_)) => Ok(()),
            (FieldKind::Bool, Value::Bool(_)) => Ok(()),
            (kind, _) => Err(err(format!("expected {}", kind.type_name()))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn object(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let map = value
            .as_object()
            .ok_or_else(|| ValidationError::new("input", "expected an object"))?;
        for field in &self.fields {
            match map.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(ValidationError::new(field.name, "is required"));
                }
                None | Some(Value::Null) => {}
                Some(v) => field.check(v)?,
            }
        }
        Ok(())
    }

    /// Validates then deserializes into the typed input.
    pub fn parse<T: DeserializeOwned>(&self, value: &Value) -> Result<T, ValidationError> {
        self.validate(value)?;
        serde_json::from_value(value.clone()).map_err(|e| {
            let field = self.failing_field::<T>(value, &e).unwrap_or("input");
            ValidationError::new(field, e.to_string())
        })
    }

    /// Finds the field whose value `T` rejects: without it, the input either parses or
    /// only misses that field. Missing fields are reported after every present value is
    /// read, so removing an unrelated field leaves the original error in place.
    fn failing_field<T: DeserializeOwned>(
        &self,
        value: &Value,
        error: &serde_json::Error,
    ) -> Option<&'static str> {
        let map = value.as_object()?;
        let original = error.to_string();
        self.fields
            .iter()
            .filter(|f| map.contains_key(f.name))
            .find(|f| {
                let mut rest = map.clone();
                rest.remove(f.name);
                match serde_json::from_value::<T>(Value::Object(rest)) {
                    Ok(_) => true,
                    Err(e) => {
                        let reason = e.to_string();
                        reason != original && reason == format!("missing field `{}`", f.name)
                    }
                }
            })
            .map(|f| f.name)
    }

    /// JSON-schema-like description, used by the `actions` listing.
    pub fn describe(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                let mut prop = json!({"type": f.kind.type_name(), "description": f.description});
                if let FieldKind::List { min } = f.kind {
                    prop["minItems"] = json!(min);
                }
                (f.name.to_string(), prop)
            })
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();
        json!({"type": "object", "properties": properties, "required": required})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buttons_schema() -> Schema {
        Schema::object(vec![
            Field::required("text", FieldKind::Text, "Message text"),
            Field::required("buttons", FieldKind::List { min: 1 }, "Buttons"),
        ])
    }

    #[derive(Debug, serde::Deserialize)]
    #[allow(dead_code)]
    struct ButtonsInput {
        text: Value,
        buttons: Vec<Button>,
    }

    #[derive(Debug, serde::Deserialize)]
    #[allow(dead_code)]
    struct Button {
        title: String,
        payload: String,
    }

    #[test]
    fn item_errors_name_the_list_field() {
        let err = buttons_schema()
            .parse::<ButtonsInput>(&json!({"text": "Pick", "buttons": [{"title": "Yes"}]}))
            .unwrap_err();
        assert_eq!(err.field, "buttons");
        assert!(err.reason.contains("payload"));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = buttons_schema()
            .validate(&json!({"buttons": [{}]}))
            .unwrap_err();
        assert_eq!(err.field, "text");
    }

    #[test]
    fn min_cardinality_is_enforced() {
        let err = buttons_schema()
            .validate(&json!({"text": "Pick", "buttons": []}))
            .unwrap_err();
        assert_eq!(err.field, "buttons");
        assert!(err.reason.contains("at least 1"));
    }

    #[test]
    fn text_accepts_string_or_non_empty_list() {
        let schema = buttons_schema();
        assert!(schema
            .validate(&json!({"text": ["a", "b"], "buttons": [1]}))
            .is_ok());
        assert!(schema.validate(&json!({"text": [], "buttons": [1]})).is_err());
        assert!(schema.validate(&json!({"text": 3, "buttons": [1]})).is_err());
    }

    #[test]
    fn describe_lists_required_fields() {
        let described = buttons_schema().describe();
        assert_eq!(described["required"], json!(["text", "buttons"]));
        assert_eq!(described["properties"]["buttons"]["minItems"], 1);
    }
}
