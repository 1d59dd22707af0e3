//! The ten-section clinical intake form.

use std::sync::Arc;

use shared::domain::{FieldError, FormState, SectionData, SectionId, ValidationResult};
use wizard_core::{validator_fn, RequiredFields, SectionDefinition, SectionRegistry};

pub const REFERRAL: &str = "section1";
pub const IDENTITY: &str = "section2";
pub const DEMOGRAPHICS: &str = "section3";
pub const DIAGNOSIS: &str = "section4";
pub const STAGING: &str = "section5";
pub const TREATMENT: &str = "section6";
pub const FAMILY_HISTORY: &str = "section7";
pub const RISK_FACTORS: &str = "section8";
pub const FOLLOW_UP: &str = "section9";
pub const CONSENT: &str = "section10";

const NIK_LENGTH: usize = 16;

pub fn intake_registry() -> anyhow::Result<Arc<SectionRegistry>> {
    let registry = SectionRegistry::new(vec![
        SectionDefinition::new(REFERRAL, "Referral")
            .description("Referring facility and specimen pathology")
            .with_validator(
                RequiredFields::default()
                    .labelled("referralDate", "Referral date")
                    .labelled("facility", "Referring facility"),
            ),
        SectionDefinition::new(IDENTITY, "Patient Identity")
            .with_validator(validator_fn(validate_identity)),
        SectionDefinition::new(DEMOGRAPHICS, "Demographics").with_validator(
            RequiredFields::default()
                .labelled("sex", "Sex")
                .labelled("province", "Province"),
        ),
        SectionDefinition::new(DIAGNOSIS, "Diagnosis").with_validator(
            RequiredFields::default()
                .labelled("diagnosisDate", "Diagnosis date")
                .labelled("primarySite", "Primary site"),
        ),
        SectionDefinition::new(STAGING, "Pathology Staging")
            .description("Only collected once a pathology type is recorded")
            .with_validator(RequiredFields::default().labelled("stage", "Stage"))
            .render_when(|state| state.has_value(&SectionId::from(REFERRAL), "pathologyType")),
        SectionDefinition::new(TREATMENT, "Treatment History").optional(),
        SectionDefinition::new(FAMILY_HISTORY, "Family History")
            .optional()
            .with_validator(validator_fn(validate_family_history)),
        SectionDefinition::new(RISK_FACTORS, "Lifestyle & Risk Factors").optional(),
        SectionDefinition::new(FOLLOW_UP, "Follow-up Plan")
            .with_validator(validator_fn(validate_follow_up)),
        SectionDefinition::new(CONSENT, "Consent").with_validator(
            RequiredFields::default().labelled("consent", "Patient consent"),
        ),
    ])?;
    Ok(Arc::new(registry))
}

fn validate_identity(data: &SectionData, _state: &FormState) -> ValidationResult {
    let mut errors = RequiredFields::default()
        .labelled("nik", "NIK")
        .labelled("fullName", "Full name")
        .labelled("birthDate", "Birth date")
        .check(data)
        .errors;

    if let Some(nik) = data.get("nik").and_then(|v| v.as_str()) {
        let nik = nik.trim();
        if !nik.is_empty()
            && (nik.len() != NIK_LENGTH || !nik.chars().all(|c| c.is_ascii_digit()))
        {
            errors.push(FieldError::new("nik", "NIK must be 16 digits"));
        }
    }
    ValidationResult::from_errors(errors)
}

fn validate_family_history(data: &SectionData, _state: &FormState) -> ValidationResult {
    let affected = data
        .get("relativeAffected")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if affected && !data.get("relation").is_some_and(shared::domain::is_filled) {
        return ValidationResult::invalid(vec![FieldError::new(
            "relation",
            "Relation is required when a relative is affected",
        )]);
    }
    ValidationResult::valid()
}

/// ISO-8601 dates compare correctly as strings.
fn validate_follow_up(data: &SectionData, state: &FormState) -> ValidationResult {
    let mut errors = RequiredFields::default()
        .labelled("followUpDate", "Follow-up date")
        .check(data)
        .errors;

    let follow_up = data.get("followUpDate").and_then(|v| v.as_str());
    let diagnosed = state
        .field(&SectionId::from(DIAGNOSIS), "diagnosisDate")
        .and_then(|v| v.as_str());
    if let (Some(follow_up), Some(diagnosed)) = (follow_up, diagnosed) {
        if !follow_up.is_empty() && follow_up < diagnosed {
            errors.push(FieldError::new(
                "followUpDate",
                "Follow-up cannot be scheduled before the diagnosis date",
            ));
        }
    }
    ValidationResult::from_errors(errors)
}
