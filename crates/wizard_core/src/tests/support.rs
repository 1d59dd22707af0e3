use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared::{
    domain::{FormState, SectionData},
    draft::Draft,
};
use storage::{DraftStore, DraftSummary, MemoryDraftStore};
use tokio::sync::Mutex;

use crate::remote::{CompletionHandler, RemoteDraftSync, SubmissionReceipt};

pub fn data(value: Value) -> SectionData {
    match value {
        Value::Object(map) => map,
        other => panic!("section data must be an object, got {other}"),
    }
}

/// Memory-backed draft store that records writes and can be told to fail.
#[derive(Default)]
pub struct RecordingDraftStore {
    pub inner: MemoryDraftStore,
    writes: Mutex<Vec<Draft>>,
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
    write_delay: StdMutex<Option<Duration>>,
}

impl RecordingDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_writes(self) -> Self {
        self.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_removes(self) -> Self {
        self.fail_removes.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_write_delay(self, delay: Duration) -> Self {
        *self.write_delay.lock().expect("delay lock") = Some(delay);
        self
    }

    pub async fn writes(&self) -> Vec<Draft> {
        self.writes.lock().await.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.writes.lock().await.len()
    }
}

#[async_trait]
impl DraftStore for RecordingDraftStore {
    async fn get(&self, key: &str) -> Result<Option<Draft>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, draft: &Draft) -> Result<()> {
        let delay = *self.write_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        self.writes.lock().await.push(draft.clone());
        self.inner.set(key, draft).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(anyhow!("read-only filesystem"));
        }
        self.inner.remove(key).await
    }

    async fn list_keys(&self) -> Result<Vec<DraftSummary>> {
        self.inner.list_keys().await
    }
}

pub struct RecordingCompletion {
    calls: Mutex<Vec<FormState>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl RecordingCompletion {
    pub fn ok() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_with: None,
            delay: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::ok()
        }
    }

    pub async fn calls(&self) -> Vec<FormState> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CompletionHandler for RecordingCompletion {
    async fn complete(&self, state: FormState) -> Result<SubmissionReceipt> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().await.push(state);
        if let Some(message) = &self.fail_with {
            return Err(anyhow!(message.clone()));
        }
        Ok(SubmissionReceipt {
            reference: Some("INTAKE-0001".into()),
            submitted_at: Utc::now(),
        })
    }
}

#[derive(Default)]
pub struct UnreachableRemote {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RemoteDraftSync for UnreachableRemote {
    async fn save(&self, _state: &FormState) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("connection refused"))
    }
}
