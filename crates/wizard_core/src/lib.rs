//! Multi-step form wizard: section registry, section-scoped form store with
//! draft persistence, and a navigation/submission controller.

use chrono::{DateTime, Utc};
use shared::domain::SectionId;

pub mod autosave;
pub mod controller;
pub mod error;
pub mod presentation;
pub mod registry;
pub mod remote;
pub mod store;
pub mod validation;

pub use autosave::{AutoSaveConfig, AutoSaveHandle};
pub use controller::{HiddenSectionPolicy, NextOutcome, WizardController, WizardOptions};
pub use error::{RegistryError, SectionFailure, StoreError, SubmitError};
pub use presentation::{NavigatorEntry, ProgressSnapshot, ReviewSection, WizardRuntimeState};
pub use registry::{SectionDefinition, SectionRegistry};
pub use remote::{
    CompletionHandler, HttpCompletionHandler, HttpDraftSync, MissingCompletionHandler,
    RemoteDraftSync, SubmissionReceipt,
};
pub use store::{DraftStatus, FormStore, SectionHandle, DEFAULT_DRAFT_KEY};
pub use validation::{validator_fn, RequiredFields, SectionValidator, ValidationTicket};

/// Notifications published by a [`FormStore`] to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    SectionUpdated { section: SectionId, revision: u64 },
    ValidationChanged { section: SectionId, is_valid: bool },
    DraftSaved { at: DateTime<Utc> },
    DraftSaveFailed { message: String },
    DraftLoaded { at: DateTime<Utc> },
    DraftCleared,
    Navigated { index: usize, section: Option<SectionId> },
    SubmissionBlocked { section: SectionId },
    Submitted { reference: Option<String> },
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
