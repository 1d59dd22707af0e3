use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FormState, SectionId, ValidationResult};

/// Persisted snapshot of a wizard session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub data: FormState,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub validation: BTreeMap<SectionId, ValidationResult>,
}

impl Draft {
    pub fn new(
        data: FormState,
        timestamp: DateTime<Utc>,
        validation: BTreeMap<SectionId, ValidationResult>,
    ) -> Self {
        Self {
            data,
            timestamp,
            validation,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::FieldError;

    #[test]
    fn parses_draft_without_validation_map() {
        let draft = Draft::from_json(
            r#"{"data":{"section1":{"pathologyType":"solid"}},"timestamp":"2026-01-02T03:04:05Z"}"#,
        )
        .expect("parse");
        assert!(draft.validation.is_empty());
        assert_eq!(
            draft.data.field(&"section1".into(), "pathologyType"),
            Some(&json!("solid"))
        );
    }

    #[test]
    fn keeps_validation_errors_through_json() {
        let mut validation = BTreeMap::new();
        validation.insert(
            SectionId::from("section2"),
            ValidationResult::invalid(vec![FieldError::new("nik", "NIK is required")]),
        );
        let draft = Draft::new(FormState::new(), Utc::now(), validation);

        let restored = Draft::from_json(&draft.to_json().expect("encode")).expect("decode");
        assert_eq!(restored, draft);
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(Draft::from_json(r#"{"data":{"section1":"#).is_err());
    }
}
