//! Debounced background draft saving.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, warn};

use crate::{error::StoreError, store::FormStore, WizardEvent};

/// Configuration for auto-save behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    pub enabled: bool,

    /// Quiet period after the last mutation before a save runs.
    /// Every further mutation restarts it.
    pub debounce: Duration,

    /// Upper bound on how long a continuous stream of edits can postpone a
    /// save, measured from the first unsaved mutation.
    pub max_delay: Option<Duration>,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: Duration::from_secs(2),
            max_delay: None,
        }
    }
}

impl AutoSaveConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            debounce,
            ..Default::default()
        }
    }
}

/// Handle to a running auto-saver; the task stops when the handle is
/// dropped.
pub struct AutoSaveHandle {
    task: JoinHandle<()>,
}

impl AutoSaveHandle {
    /// Starts watching `store` for mutations. Returns `None` when auto-save
    /// is disabled.
    pub fn spawn(store: Arc<FormStore>, config: AutoSaveConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let events = store.subscribe();
        let task = tokio::spawn(run_autosave(store, config, events));
        Some(Self { task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for AutoSaveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Pending {
    deadline: Instant,
    first_change: Instant,
}

impl Pending {
    fn fire_at(&self, max_delay: Option<Duration>) -> Instant {
        match max_delay {
            Some(max) => self.deadline.min(self.first_change + max),
            None => self.deadline,
        }
    }
}

async fn run_autosave(
    store: Arc<FormStore>,
    config: AutoSaveConfig,
    mut events: broadcast::Receiver<WizardEvent>,
) {
    let mut pending: Option<Pending> = None;

    loop {
        let fire_at = pending.as_ref().map(|p| p.fire_at(config.max_delay));

        tokio::select! {
            received = events.recv() => match received {
                Ok(WizardEvent::SectionUpdated { .. }) | Err(RecvError::Lagged(_)) => {
                    if store.status().is_dirty {
                        let now = Instant::now();
                        let first_change = pending.as_ref().map_or(now, |p| p.first_change);
                        pending = Some(Pending {
                            deadline: now + config.debounce,
                            first_change,
                        });
                    }
                }
                Ok(WizardEvent::DraftCleared | WizardEvent::DraftLoaded { .. }) => {
                    pending = None;
                }
                Ok(_) => {}
                Err(RecvError::Closed) => break,
            },
            _ = sleep_until(fire_at.unwrap_or_else(Instant::now)), if fire_at.is_some() => {
                pending = None;
                match store.save_draft().await {
                    Ok(at) => debug!(draft_key = store.draft_key(), saved_at = %at, "auto-save complete"),
                    Err(StoreError::Discarded { .. }) => {}
                    // Stays dirty; the next mutation re-arms the timer.
                    Err(err) => warn!(error = %err, "auto-save failed"),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/autosave_tests.rs"]
mod tests;
