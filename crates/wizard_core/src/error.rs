use shared::domain::{SectionId, ValidationResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("section registry must contain at least one section")]
    Empty,
    #[error("section id '{0}' is declared more than once")]
    DuplicateSection(SectionId),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {operation} draft '{key}': {source}")]
    Persistence {
        operation: &'static str,
        key: String,
        source: anyhow::Error,
    },
    /// The draft was cleared or reloaded while this save waited for an earlier one.
    #[error("draft '{key}' changed underneath a queued save; snapshot discarded")]
    Discarded { key: String },
}

/// One section that failed submit-time validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionFailure {
    pub section: SectionId,
    pub is_optional: bool,
    /// The section was not visible when the submission was attempted.
    pub hidden: bool,
    pub result: ValidationResult,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission blocked: required section '{section}' is invalid")]
    Blocked {
        section: SectionId,
        /// Visible position of `section`; `None` when the section is hidden.
        index: Option<usize>,
        failures: Vec<SectionFailure>,
    },
    #[error("a submission is already in progress")]
    InProgress,
    #[error("completion handler rejected the submission: {source}")]
    Completion { source: anyhow::Error },
}

impl SubmitError {
    pub fn failures(&self) -> &[SectionFailure] {
        match self {
            Self::Blocked { failures, .. } => failures,
            _ => &[],
        }
    }
}
