use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! key_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

key_newtype!(SectionId);

/// Field values of one section, keyed by field name.
pub type SectionData = serde_json::Map<String, Value>;

/// Every section's data, keyed by section id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormState(BTreeMap<SectionId, SectionData>);

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, id: &SectionId) -> Option<&SectionData> {
        self.0.get(id)
    }

    pub fn field(&self, id: &SectionId, field: &str) -> Option<&Value> {
        self.0.get(id).and_then(|data| data.get(field))
    }

    /// True when the field exists and holds something other than null, `false`,
    /// an empty string, or an empty collection.
    pub fn has_value(&self, id: &SectionId, field: &str) -> bool {
        self.field(id, field).is_some_and(is_filled)
    }

    pub fn merge_section(&mut self, id: SectionId, partial: SectionData) {
        let entry = self.0.entry(id).or_default();
        for (field, value) in partial {
            entry.insert(field, value);
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = (&SectionId, &SectionData)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(SectionId, SectionData)> for FormState {
    fn from_iter<T: IntoIterator<Item = (SectionId, SectionData)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<FieldError>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }

    /// Valid exactly when `errors` is empty.
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    pub fn error_for(&self, field: &str) -> Option<&FieldError> {
        self.errors.iter().find(|error| error.field == field)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(value: Value) -> SectionData {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn merge_overwrites_only_named_fields() {
        let mut state = FormState::new();
        let id = SectionId::from("section1");
        state.merge_section(id.clone(), data(json!({"name": "Ana", "age": 40})));
        state.merge_section(id.clone(), data(json!({"age": 41})));

        assert_eq!(state.field(&id, "name"), Some(&json!("Ana")));
        assert_eq!(state.field(&id, "age"), Some(&json!(41)));
    }

    #[test]
    fn blank_values_do_not_count_as_filled() {
        let mut state = FormState::new();
        let id = SectionId::from("section1");
        state.merge_section(
            id.clone(),
            data(json!({"blank": "  ", "none": null, "list": [], "zero": 0})),
        );

        assert!(!state.has_value(&id, "blank"));
        assert!(!state.has_value(&id, "none"));
        assert!(!state.has_value(&id, "list"));
        assert!(!state.has_value(&id, "missing"));
        assert!(state.has_value(&id, "zero"));
    }

    #[test]
    fn form_state_serializes_as_plain_map() {
        let mut state = FormState::new();
        state.merge_section("s2".into(), data(json!({"nik": "123"})));
        let encoded = serde_json::to_value(&state).expect("encode");
        assert_eq!(encoded, json!({"s2": {"nik": "123"}}));
    }

    #[test]
    fn from_errors_tracks_validity() {
        assert!(ValidationResult::from_errors(Vec::new()).is_valid);
        let failed = ValidationResult::from_errors(vec![FieldError::new("nik", "required")]);
        assert!(!failed.is_valid);
        assert_eq!(failed.error_for("nik").map(|e| e.message.as_str()), Some("required"));
    }
}
