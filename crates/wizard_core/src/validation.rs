use std::panic::AssertUnwindSafe;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use shared::domain::{is_filled, FieldError, FormState, SectionData, SectionId, ValidationResult};
use tracing::{error, warn};

use crate::registry::SectionDefinition;

/// Field name used for errors that belong to the whole section.
pub const SECTION_ERROR_FIELD: &str = "_section";

/// Validates one section's data, with the full form available for
/// cross-section rules.
///
/// Implementations must accept partial or empty `data`.
#[async_trait]
pub trait SectionValidator: Send + Sync {
    async fn validate(&self, data: &SectionData, state: &FormState) -> Result<ValidationResult>;
}

pub struct FnValidator<F>(F);

/// Adapts a synchronous closure into a [`SectionValidator`].
pub fn validator_fn<F>(rule: F) -> FnValidator<F>
where
    F: Fn(&SectionData, &FormState) -> ValidationResult + Send + Sync,
{
    FnValidator(rule)
}

#[async_trait]
impl<F> SectionValidator for FnValidator<F>
where
    F: Fn(&SectionData, &FormState) -> ValidationResult + Send + Sync,
{
    async fn validate(&self, data: &SectionData, state: &FormState) -> Result<ValidationResult> {
        Ok((self.0)(data, state))
    }
}

/// Fails every listed field that is absent or blank.
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    fields: Vec<(String, String)>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|field| {
                    let field = field.into();
                    (field.clone(), field)
                })
                .collect(),
        }
    }

    pub fn labelled(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.fields.push((field.into(), label.into()));
        self
    }

    pub fn check(&self, data: &SectionData) -> ValidationResult {
        let errors = self
            .fields
            .iter()
            .filter(|(field, _)| !data.get(field).is_some_and(is_filled))
            .map(|(field, label)| FieldError::new(field.clone(), format!("{label} is required")))
            .collect();
        ValidationResult::from_errors(errors)
    }
}

#[async_trait]
impl SectionValidator for RequiredFields {
    async fn validate(&self, data: &SectionData, _state: &FormState) -> Result<ValidationResult> {
        Ok(self.check(data))
    }
}

/// Identifies one validation run so late responses can be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTicket {
    pub(crate) section: SectionId,
    pub(crate) generation: u64,
}

/// Runs a section's validator, turning errors and panics into a failing result.
pub async fn run_section_validator(
    section: &SectionDefinition,
    data: &SectionData,
    state: &FormState,
) -> ValidationResult {
    let Some(validator) = section.validator() else {
        return ValidationResult::valid();
    };

    match AssertUnwindSafe(validator.validate(data, state))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(section = %section.id, error = %err, "section validator failed");
            ValidationResult::invalid(vec![FieldError::new(
                SECTION_ERROR_FIELD,
                format!("validation could not be completed: {err}"),
            )])
        }
        Err(_) => {
            error!(section = %section.id, "section validator panicked");
            ValidationResult::invalid(vec![FieldError::new(
                SECTION_ERROR_FIELD,
                "validation could not be completed",
            )])
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use serde_json::json;

    use super::*;

    struct Unreachable;

    #[async_trait]
    impl SectionValidator for Unreachable {
        async fn validate(&self, _: &SectionData, _: &FormState) -> Result<ValidationResult> {
            Err(anyhow!("registry lookup unavailable"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl SectionValidator for Panicking {
        async fn validate(&self, data: &SectionData, _: &FormState) -> Result<ValidationResult> {
            let code = data["icd10"].as_str().expect("icd10 present");
            Ok(ValidationResult::from_errors(if code.is_empty() {
                vec![FieldError::new("icd10", "empty")]
            } else {
                Vec::new()
            }))
        }
    }

    #[tokio::test]
    async fn missing_validator_is_always_valid() {
        let section = SectionDefinition::new("section9", "Notes");
        let result = run_section_validator(&section, &SectionData::new(), &FormState::new()).await;
        assert_eq!(result, ValidationResult::valid());
    }

    #[tokio::test]
    async fn validator_error_fails_closed() {
        let section = SectionDefinition::new("section3", "Diagnosis").with_validator(Unreachable);
        let result = run_section_validator(&section, &SectionData::new(), &FormState::new()).await;
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].field, SECTION_ERROR_FIELD);
        assert!(result.errors[0].message.contains("registry lookup unavailable"));
    }

    #[tokio::test]
    async fn validator_panic_fails_closed() {
        let section = SectionDefinition::new("section3", "Diagnosis").with_validator(Panicking);
        let result = run_section_validator(&section, &SectionData::new(), &FormState::new()).await;
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn required_fields_reports_each_blank_field_in_order() {
        let rule = RequiredFields::new(["nik", "fullName"]).labelled("birthDate", "Date of birth");
        let mut data = SectionData::new();
        data.insert("fullName".into(), json!("Siti"));
        data.insert("nik".into(), json!(""));

        let result = rule.check(&data);
        assert!(!result.is_valid);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["nik", "birthDate"]);
        assert_eq!(result.errors[1].message, "Date of birth is required");
    }

    #[tokio::test]
    async fn closures_see_the_full_form() {
        let rule = validator_fn(|data: &SectionData, state: &FormState| {
            let metastatic = state.field(&"section1".into(), "stage") == Some(&json!("IV"));
            if metastatic && !data.get("metastasisSite").is_some_and(is_filled) {
                ValidationResult::invalid(vec![FieldError::new(
                    "metastasisSite",
                    "required for stage IV",
                )])
            } else {
                ValidationResult::valid()
            }
        });

        let mut stage = SectionData::new();
        stage.insert("stage".into(), json!("IV"));
        let state: FormState = [(SectionId::from("section1"), stage)].into_iter().collect();

        let result = rule.validate(&SectionData::new(), &state).await.expect("ok");
        assert!(!result.is_valid);
        let result = rule
            .validate(&SectionData::new(), &FormState::new())
            .await
            .expect("ok");
        assert!(result.is_valid);
    }
}
