//! Read models for progress bars, step navigators and the review screen.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{SectionData, SectionId, ValidationResult};

use crate::controller::WizardController;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WizardRuntimeState {
    pub current_index: usize,
    pub completed_section_ids: Vec<SectionId>,
    pub is_dirty: bool,
    pub has_unsaved_changes: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub current_index: usize,
    pub current_section: Option<SectionId>,
    pub visible_count: usize,
    pub completed_count: usize,
    /// Completed visible sections as a whole percentage.
    pub percent_complete: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigatorEntry {
    pub id: SectionId,
    pub title: String,
    pub position: usize,
    pub is_optional: bool,
    pub is_current: bool,
    pub is_completed: bool,
    pub has_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSection {
    pub id: SectionId,
    pub title: String,
    pub description: Option<String>,
    pub is_optional: bool,
    pub data: SectionData,
    pub validation: Option<ValidationResult>,
}

impl WizardController {
    pub fn runtime_state(&self) -> WizardRuntimeState {
        let status = self.store().status();
        WizardRuntimeState {
            current_index: self.current_index(),
            completed_section_ids: self.completed_section_ids(),
            is_dirty: status.is_dirty,
            has_unsaved_changes: status.has_unsaved_changes,
            last_saved_at: status.last_saved_at,
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let visible = self.visible_sections();
        let current_index = self.current_index();
        let completed_count = visible
            .iter()
            .filter(|section| self.is_completed(&section.id))
            .count();
        let percent_complete = if visible.is_empty() {
            0
        } else {
            (completed_count * 100 / visible.len()) as u8
        };
        ProgressSnapshot {
            current_index,
            current_section: visible.get(current_index).map(|s| s.id.clone()),
            visible_count: visible.len(),
            completed_count,
            percent_complete,
        }
    }

    pub fn navigator(&self) -> Vec<NavigatorEntry> {
        let current_index = self.current_index();
        self.visible_sections()
            .iter()
            .enumerate()
            .map(|(position, section)| NavigatorEntry {
                id: section.id.clone(),
                title: section.title.clone(),
                position,
                is_optional: section.is_optional,
                is_current: position == current_index,
                is_completed: self.is_completed(&section.id),
                has_errors: self
                    .validation_for(&section.id)
                    .is_some_and(|result| !result.is_valid),
            })
            .collect()
    }

    /// Every visible section with its entered data, for a final review.
    pub fn review(&self) -> Vec<ReviewSection> {
        self.visible_sections()
            .iter()
            .map(|section| ReviewSection {
                id: section.id.clone(),
                title: section.title.clone(),
                description: section.description.clone(),
                is_optional: section.is_optional,
                data: self.store().section(&section.id),
                validation: self.validation_for(&section.id),
            })
            .collect()
    }
}
