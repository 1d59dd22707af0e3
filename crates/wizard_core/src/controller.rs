use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use shared::domain::{FormState, SectionId, ValidationResult};
use tracing::{debug, error, info, warn};

use crate::{
    autosave::{AutoSaveConfig, AutoSaveHandle},
    error::{SectionFailure, SubmitError},
    registry::{SectionDefinition, SectionRegistry},
    remote::{CompletionHandler, SubmissionReceipt},
    store::{FormStore, SectionHandle},
    validation::run_section_validator,
    WizardEvent,
};

/// How submit treats required sections that are hidden but still hold data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenSectionPolicy {
    /// Hidden sections are not validated at submit.
    #[default]
    Exclude,
    /// Hidden required sections with retained data must also be valid.
    BlockRetained,
}

#[derive(Debug, Clone, Default)]
pub struct WizardOptions {
    pub autosave: AutoSaveConfig,
    pub hidden_sections: HiddenSectionPolicy,
    /// Skip restoring the persisted draft on mount.
    pub fresh_start: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextOutcome {
    /// The gate passed; `index` is the new current position.
    Advanced { index: usize, result: ValidationResult },
    /// A required section failed; the position did not change.
    Blocked { index: usize, result: ValidationResult },
}

impl NextOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Advanced { index, .. } | Self::Blocked { index, .. } => *index,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

#[derive(Default)]
struct Navigation {
    current_index: usize,
    completed: HashSet<SectionId>,
}

/// Drives navigation across the visible sections and runs submission.
pub struct WizardController {
    registry: Arc<SectionRegistry>,
    store: Arc<FormStore>,
    completion: Arc<dyn CompletionHandler>,
    options: WizardOptions,
    navigation: Mutex<Navigation>,
    submitting: AtomicBool,
    autosave: Mutex<Option<AutoSaveHandle>>,
}

impl WizardController {
    /// Builds a controller over the store's current state without touching
    /// persistence or starting auto-save.
    pub fn new(
        registry: Arc<SectionRegistry>,
        store: Arc<FormStore>,
        completion: Arc<dyn CompletionHandler>,
        options: WizardOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            completion,
            options,
            navigation: Mutex::new(Navigation::default()),
            submitting: AtomicBool::new(false),
            autosave: Mutex::new(None),
        })
    }

    /// Restores the persisted draft (unless `fresh_start`), then starts
    /// auto-save. Navigation begins at the first visible section.
    pub async fn mount(
        registry: Arc<SectionRegistry>,
        store: Arc<FormStore>,
        completion: Arc<dyn CompletionHandler>,
        options: WizardOptions,
    ) -> Arc<Self> {
        if !options.fresh_start {
            if let Some(at) = store.load_draft().await {
                info!(draft_key = store.draft_key(), saved_at = %at, "resuming wizard from draft");
            }
        }
        let controller = Self::new(registry, store, completion, options);
        controller.start_autosave();
        controller
    }

    pub fn start_autosave(&self) {
        let handle = AutoSaveHandle::spawn(Arc::clone(&self.store), self.options.autosave.clone());
        *lock(&self.autosave) = handle;
    }

    pub fn stop_autosave(&self) {
        lock(&self.autosave).take();
    }

    pub fn autosave_running(&self) -> bool {
        lock(&self.autosave)
            .as_ref()
            .is_some_and(AutoSaveHandle::is_running)
    }

    pub fn store(&self) -> &Arc<FormStore> {
        &self.store
    }

    pub fn visible_sections(&self) -> Vec<Arc<SectionDefinition>> {
        self.registry.visible(&self.store.snapshot())
    }

    pub fn current_index(&self) -> usize {
        clamp_index(lock(&self.navigation).current_index, self.visible_sections().len())
    }

    pub fn current_section(&self) -> Option<Arc<SectionDefinition>> {
        let visible = self.visible_sections();
        let index = clamp_index(lock(&self.navigation).current_index, visible.len());
        visible.get(index).cloned()
    }

    /// Completed section ids in registry order.
    pub fn completed_section_ids(&self) -> Vec<SectionId> {
        let navigation = lock(&self.navigation);
        self.registry
            .all()
            .iter()
            .filter(|section| navigation.completed.contains(&section.id))
            .map(|section| section.id.clone())
            .collect()
    }

    pub fn is_completed(&self, id: &SectionId) -> bool {
        lock(&self.navigation).completed.contains(id)
    }

    pub fn validation_for(&self, id: &SectionId) -> Option<ValidationResult> {
        self.store.validation_for(id)
    }

    /// Renderer accessor for `id`, marked active when it is the current section.
    pub fn section_handle(&self, id: impl Into<SectionId>) -> SectionHandle<'_> {
        let id = id.into();
        let is_active = self
            .current_section()
            .is_some_and(|section| section.id == id);
        self.store.scope(id).active(is_active)
    }

    /// Validates the current section and advances when it passes or is optional.
    pub async fn next(&self) -> NextOutcome {
        let snapshot = self.store.snapshot();
        let visible = self.registry.visible(&snapshot);
        let from = clamp_index(lock(&self.navigation).current_index, visible.len());
        let Some(section) = visible.get(from).cloned() else {
            return NextOutcome::Advanced {
                index: 0,
                result: ValidationResult::valid(),
            };
        };

        let result = self.run_validation(&section, &snapshot).await;

        // The validated data may reveal or hide later sections.
        let visible = self.visible_sections();
        let position = position_of(&visible, &section.id).unwrap_or(from);
        let outcome = {
            let mut navigation = lock(&self.navigation);
            if result.is_valid {
                navigation.completed.insert(section.id.clone());
            } else {
                navigation.completed.remove(&section.id);
            }

            if result.is_valid || section.is_optional {
                navigation.current_index = clamp_index(position + 1, visible.len());
                NextOutcome::Advanced {
                    index: navigation.current_index,
                    result,
                }
            } else {
                navigation.current_index = clamp_index(position, visible.len());
                NextOutcome::Blocked {
                    index: navigation.current_index,
                    result,
                }
            }
        };

        if outcome.is_blocked() {
            debug!(section = %section.id, "next blocked by validation");
        }
        self.announce_position(&visible, outcome.index());
        outcome
    }

    /// Steps back one visible section; never validates.
    pub fn previous(&self) -> usize {
        let visible = self.visible_sections();
        let index = {
            let mut navigation = lock(&self.navigation);
            let current = clamp_index(navigation.current_index, visible.len());
            navigation.current_index = current.saturating_sub(1);
            navigation.current_index
        };
        self.announce_position(&visible, index);
        index
    }

    /// Jumps to a visible position, clamped to the valid range.
    pub fn go_to(&self, index: usize) -> usize {
        let visible = self.visible_sections();
        let index = clamp_index(index, visible.len());
        lock(&self.navigation).current_index = index;
        self.announce_position(&visible, index);
        index
    }

    /// Jumps to `id` if it is visible; otherwise the position is unchanged.
    pub fn go_to_section(&self, id: &SectionId) -> Option<usize> {
        let visible = self.visible_sections();
        let Some(index) = position_of(&visible, id) else {
            debug!(section = %id, "ignoring jump to hidden or unknown section");
            return None;
        };
        lock(&self.navigation).current_index = index;
        self.announce_position(&visible, index);
        Some(index)
    }

    /// Validates `id` outside of navigation, e.g. after an edit.
    ///
    /// Returns `None` for unknown sections and when a newer validation of the
    /// same section started before this one finished.
    pub async fn validate_section(&self, id: &SectionId) -> Option<ValidationResult> {
        let section = self.registry.get(id)?.clone();
        let snapshot = self.store.snapshot();
        let data = snapshot.section(id).cloned().unwrap_or_default();
        let ticket = self.store.begin_validation(id);
        let result = run_section_validator(&section, &data, &snapshot).await;
        self.store
            .apply_validation(&ticket, result.clone())
            .then_some(result)
    }

    /// Re-validates every visible section and hands the form to the
    /// completion handler when no required section fails.
    ///
    /// On success the draft is cleared and navigation resets. On any failure
    /// the draft is left as it was.
    pub async fn submit(&self) -> Result<SubmissionReceipt, SubmitError> {
        if self.submitting.swap(true, Ordering::AcqRel) {
            return Err(SubmitError::InProgress);
        }
        let _submitting = SubmittingGuard(&self.submitting);

        let snapshot = self.store.snapshot();
        let visible = self.registry.visible(&snapshot);
        let mut targets: Vec<(Arc<SectionDefinition>, bool)> =
            visible.iter().map(|section| (Arc::clone(section), false)).collect();
        if self.options.hidden_sections == HiddenSectionPolicy::BlockRetained {
            targets.extend(
                self.registry
                    .all()
                    .iter()
                    .filter(|section| !section.is_optional)
                    .filter(|section| position_of(&visible, &section.id).is_none())
                    .filter(|section| {
                        snapshot
                            .section(&section.id)
                            .is_some_and(|data| !data.is_empty())
                    })
                    .map(|section| (Arc::clone(section), true)),
            );
        }

        let results = join_all(
            targets
                .iter()
                .map(|(section, _)| self.run_validation(section, &snapshot)),
        )
        .await;

        let mut failures = Vec::new();
        {
            let mut navigation = lock(&self.navigation);
            for ((section, hidden), result) in targets.iter().zip(results) {
                if result.is_valid {
                    navigation.completed.insert(section.id.clone());
                    continue;
                }
                navigation.completed.remove(&section.id);
                failures.push(SectionFailure {
                    section: section.id.clone(),
                    is_optional: section.is_optional,
                    hidden: *hidden,
                    result,
                });
            }
        }

        if let Some(blocking) = failures.iter().find(|failure| !failure.is_optional) {
            let section = blocking.section.clone();
            let index = if blocking.hidden {
                None
            } else {
                position_of(&visible, &section)
            };
            if let Some(index) = index {
                lock(&self.navigation).current_index = index;
                self.announce_position(&visible, index);
            }
            warn!(
                %section,
                failed_sections = failures.len(),
                "submission blocked by invalid required section"
            );
            self.store.notify(WizardEvent::SubmissionBlocked {
                section: section.clone(),
            });
            return Err(SubmitError::Blocked {
                section,
                index,
                failures,
            });
        }

        info!(sections = visible.len(), "submitting wizard");
        let receipt = match self.completion.complete(snapshot).await {
            Ok(receipt) => receipt,
            Err(source) => {
                error!(error = %source, "submission failed; draft kept");
                return Err(SubmitError::Completion { source });
            }
        };

        if let Err(err) = self.store.clear_draft().await {
            warn!(error = %err, "submission accepted but the draft could not be removed");
        }
        *lock(&self.navigation) = Navigation::default();
        info!(reference = ?receipt.reference, "wizard submitted");
        self.store.notify(WizardEvent::Submitted {
            reference: receipt.reference.clone(),
        });
        Ok(receipt)
    }

    async fn run_validation(
        &self,
        section: &SectionDefinition,
        snapshot: &FormState,
    ) -> ValidationResult {
        let data = snapshot.section(&section.id).cloned().unwrap_or_default();
        let ticket = self.store.begin_validation(&section.id);
        let result = run_section_validator(section, &data, snapshot).await;
        self.store.apply_validation(&ticket, result.clone());
        result
    }

    fn announce_position(&self, visible: &[Arc<SectionDefinition>], index: usize) {
        self.store.notify(WizardEvent::Navigated {
            index,
            section: visible.get(index).map(|section| section.id.clone()),
        });
    }
}

struct SubmittingGuard<'a>(&'a AtomicBool);

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

fn position_of(sections: &[Arc<SectionDefinition>], id: &SectionId) -> Option<usize> {
    sections.iter().position(|section| &section.id == id)
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
