use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{
    domain::{FieldError, FormState, SectionData, SectionId, ValidationResult},
    draft::Draft,
};
use storage::DraftStore;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::StoreError, remote::RemoteDraftSync, validation::ValidationTicket, WizardEvent,
};

pub const DEFAULT_DRAFT_KEY: &str = "clinical-intake-draft";
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Dirty/saved flags exposed to progress consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftStatus {
    pub is_dirty: bool,
    pub has_unsaved_changes: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StoreState {
    data: FormState,
    validation: BTreeMap<SectionId, ValidationResult>,
    status: DraftStatus,
    /// Bumped by every data mutation.
    revision: u64,
    /// Bumped by load and clear; queued saves from an older epoch are dropped.
    epoch: u64,
    generations: HashMap<SectionId, u64>,
}

/// Section-keyed form data, validation results and draft persistence.
///
/// Mutations are synchronous and never hold the state lock across an await,
/// so each call applies atomically. Other components only read snapshots.
pub struct FormStore {
    draft_key: String,
    persistence: Arc<dyn DraftStore>,
    remote: Option<Arc<dyn RemoteDraftSync>>,
    inner: RwLock<StoreState>,
    save_gate: Mutex<()>,
    events: broadcast::Sender<WizardEvent>,
}

impl FormStore {
    pub fn new(persistence: Arc<dyn DraftStore>, draft_key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            draft_key: draft_key.into(),
            persistence,
            remote: None,
            inner: RwLock::new(StoreState::default()),
            save_gate: Mutex::new(()),
            events,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteDraftSync>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn draft_key(&self) -> &str {
        &self.draft_key
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WizardEvent> {
        self.events.subscribe()
    }

    pub(crate) fn notify(&self, event: WizardEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Shallow-merges `partial` into the section's data.
    pub fn update_section(&self, id: impl Into<SectionId>, partial: SectionData) {
        let section = id.into();
        let revision = {
            let mut state = self.write();
            state.data.merge_section(section.clone(), partial);
            state.revision += 1;
            state.status.is_dirty = true;
            state.status.has_unsaved_changes = true;
            state.revision
        };
        debug!(%section, revision, "section updated");
        self.notify(WizardEvent::SectionUpdated { section, revision });
    }

    pub fn update_field(
        &self,
        id: impl Into<SectionId>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) {
        let mut partial = SectionData::new();
        partial.insert(field.into(), value.into());
        self.update_section(id, partial);
    }

    /// The section's data, or an empty map if nothing was entered.
    pub fn section(&self, id: &SectionId) -> SectionData {
        self.read().data.section(id).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> FormState {
        self.read().data.clone()
    }

    pub fn set_validation(&self, id: impl Into<SectionId>, result: ValidationResult) {
        let section = id.into();
        let is_valid = result.is_valid;
        {
            let mut state = self.write();
            // A direct write supersedes any validation still in flight.
            *state.generations.entry(section.clone()).or_default() += 1;
            state.validation.insert(section.clone(), result);
        }
        self.notify(WizardEvent::ValidationChanged { section, is_valid });
    }

    pub fn validation_for(&self, id: &SectionId) -> Option<ValidationResult> {
        self.read().validation.get(id).cloned()
    }

    pub fn errors_for(&self, id: &SectionId) -> Vec<FieldError> {
        self.read()
            .validation
            .get(id)
            .map(|result| result.errors.clone())
            .unwrap_or_default()
    }

    pub fn validation_map(&self) -> BTreeMap<SectionId, ValidationResult> {
        self.read().validation.clone()
    }

    /// Starts a validation run for `id`; any earlier ticket for the same
    /// section becomes stale.
    pub fn begin_validation(&self, id: &SectionId) -> ValidationTicket {
        let mut state = self.write();
        let generation = state.generations.entry(id.clone()).or_default();
        *generation += 1;
        ValidationTicket {
            section: id.clone(),
            generation: *generation,
        }
    }

    /// Records `result` only if `ticket` is still the latest for its section.
    pub fn apply_validation(&self, ticket: &ValidationTicket, result: ValidationResult) -> bool {
        let is_valid = result.is_valid;
        {
            let mut state = self.write();
            let current = state
                .generations
                .get(&ticket.section)
                .copied()
                .unwrap_or_default();
            if current != ticket.generation {
                debug!(
                    section = %ticket.section,
                    stale = ticket.generation,
                    current,
                    "discarding superseded validation result"
                );
                return false;
            }
            state.validation.insert(ticket.section.clone(), result);
        }
        self.notify(WizardEvent::ValidationChanged {
            section: ticket.section.clone(),
            is_valid,
        });
        true
    }

    pub fn status(&self) -> DraftStatus {
        self.read().status.clone()
    }

    /// Renderer-facing accessor bound to one section.
    pub fn scope(&self, id: impl Into<SectionId>) -> SectionHandle<'_> {
        SectionHandle {
            store: self,
            section: id.into(),
            is_active: false,
        }
    }

    /// Persists the current data and validation map.
    ///
    /// Saves run one at a time. The snapshot is taken once earlier saves have
    /// finished, so a queued save never writes older data over a newer one;
    /// edits made while the write is in flight keep the store dirty. A save
    /// that was queued behind a load or clear is discarded. A configured
    /// remote sync runs after the local write and its failure is only logged.
    pub async fn save_draft(&self) -> Result<DateTime<Utc>, StoreError> {
        let requested_epoch = self.read().epoch;

        let _gate = self.save_gate.lock().await;
        let (draft, revision, epoch) = {
            let state = self.read();
            if state.epoch != requested_epoch {
                debug!(draft_key = %self.draft_key, "queued draft save dropped after reset");
                return Err(StoreError::Discarded {
                    key: self.draft_key.clone(),
                });
            }
            let now = Utc::now();
            let timestamp = state.status.last_saved_at.map_or(now, |last| last.max(now));
            (
                Draft::new(state.data.clone(), timestamp, state.validation.clone()),
                state.revision,
                state.epoch,
            )
        };
        let timestamp = draft.timestamp;

        if let Err(source) = self.persistence.set(&self.draft_key, &draft).await {
            warn!(draft_key = %self.draft_key, error = %source, "failed to persist draft");
            self.notify(WizardEvent::DraftSaveFailed {
                message: source.to_string(),
            });
            return Err(StoreError::Persistence {
                operation: "save",
                key: self.draft_key.clone(),
                source,
            });
        }

        if let Some(remote) = &self.remote {
            if let Err(err) = remote.save(&draft.data).await {
                warn!(draft_key = %self.draft_key, error = %err, "remote draft sync failed; local draft kept");
            }
        }

        {
            let mut state = self.write();
            if state.epoch == epoch {
                state.status.last_saved_at = Some(timestamp);
                if state.revision == revision {
                    state.status.is_dirty = false;
                    state.status.has_unsaved_changes = false;
                }
            }
        }
        info!(draft_key = %self.draft_key, revision, saved_at = %timestamp, "draft saved");
        self.notify(WizardEvent::DraftSaved { at: timestamp });
        Ok(timestamp)
    }

    /// Restores data and validation from the persisted draft.
    ///
    /// Returns the draft's timestamp when one was restored. Missing or
    /// unreadable drafts leave the current state untouched. Waits for any
    /// in-flight save so the restored draft is the latest one written.
    pub async fn load_draft(&self) -> Option<DateTime<Utc>> {
        let _gate = self.save_gate.lock().await;
        let draft = match self.persistence.get(&self.draft_key).await {
            Ok(Some(draft)) => draft,
            Ok(None) => {
                debug!(draft_key = %self.draft_key, "no draft to restore");
                return None;
            }
            Err(err) => {
                warn!(draft_key = %self.draft_key, error = %err, "ignoring unreadable draft");
                return None;
            }
        };

        let at = draft.timestamp;
        {
            let mut state = self.write();
            state.data = draft.data;
            state.validation = draft.validation;
            state.status = DraftStatus {
                is_dirty: false,
                has_unsaved_changes: false,
                last_saved_at: Some(at),
            };
            state.revision += 1;
            state.epoch += 1;
            state.generations.values_mut().for_each(|g| *g += 1);
        }
        info!(draft_key = %self.draft_key, saved_at = %at, "draft restored");
        self.notify(WizardEvent::DraftLoaded { at });
        Some(at)
    }

    /// Removes the persisted draft and resets all in-memory state.
    ///
    /// The in-memory reset happens even when the removal fails.
    pub async fn clear_draft(&self) -> Result<(), StoreError> {
        let _gate = self.save_gate.lock().await;
        let removal = self.persistence.remove(&self.draft_key).await;
        {
            let mut state = self.write();
            state.data = FormState::new();
            state.validation.clear();
            state.status = DraftStatus::default();
            state.revision += 1;
            state.epoch += 1;
            // Generations stay monotonic so tickets issued before the reset stay stale.
            state.generations.values_mut().for_each(|g| *g += 1);
        }
        self.notify(WizardEvent::DraftCleared);

        match removal {
            Ok(()) => {
                info!(draft_key = %self.draft_key, "draft cleared");
                Ok(())
            }
            Err(source) => {
                warn!(draft_key = %self.draft_key, error = %source, "failed to remove persisted draft");
                Err(StoreError::Persistence {
                    operation: "remove",
                    key: self.draft_key.clone(),
                    source,
                })
            }
        }
    }
}

/// Read/write access to one section, as handed to a section renderer.
pub struct SectionHandle<'a> {
    store: &'a FormStore,
    section: SectionId,
    is_active: bool,
}

impl SectionHandle<'_> {
    pub(crate) fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn id(&self) -> &SectionId {
        &self.section
    }

    pub fn data(&self) -> SectionData {
        self.store.section(&self.section)
    }

    pub fn update(&self, partial: SectionData) {
        self.store.update_section(self.section.clone(), partial);
    }

    pub fn update_field(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.store.update_field(self.section.clone(), field, value);
    }

    pub fn errors(&self) -> Vec<FieldError> {
        self.store.errors_for(&self.section)
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
