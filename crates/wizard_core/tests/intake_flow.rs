use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use shared::domain::FormState;
use storage::{DraftStore, Storage};
use tokio::sync::Mutex;
use wizard_core::{
    AutoSaveConfig, CompletionHandler, FormStore, RequiredFields, SectionDefinition,
    SectionRegistry, SubmissionReceipt, WizardController, WizardEvent, WizardOptions,
    DEFAULT_DRAFT_KEY,
};

#[derive(Default)]
struct Inbox {
    received: Mutex<Vec<FormState>>,
}

#[async_trait]
impl CompletionHandler for Inbox {
    async fn complete(&self, state: FormState) -> Result<SubmissionReceipt> {
        self.received.lock().await.push(state);
        Ok(SubmissionReceipt {
            reference: Some("RS-0007".into()),
            submitted_at: Utc::now(),
        })
    }
}

fn registry() -> Arc<SectionRegistry> {
    Arc::new(
        SectionRegistry::new(vec![
            SectionDefinition::new("section1", "Referral")
                .with_validator(RequiredFields::new(["referralDate"])),
            SectionDefinition::new("section2", "Identity")
                .with_validator(RequiredFields::new(["nik", "fullName"])),
            SectionDefinition::new("section3", "Notes").optional(),
        ])
        .expect("registry"),
    )
}

fn options() -> WizardOptions {
    WizardOptions {
        autosave: AutoSaveConfig::with_debounce(Duration::from_millis(50)),
        ..WizardOptions::default()
    }
}

async fn wait_for_save(events: &mut tokio::sync::broadcast::Receiver<WizardEvent>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(WizardEvent::DraftSaved { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .expect("auto-save within five seconds");
}

#[tokio::test]
async fn wizard_resumes_from_sqlite_draft_and_submits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!(
        "sqlite://{}",
        dir.path()
            .join("intake.db")
            .to_string_lossy()
            .replace('\\', "/")
    );

    {
        let storage = Storage::new(&database_url).await.expect("open storage");
        let store = Arc::new(FormStore::new(Arc::new(storage), DEFAULT_DRAFT_KEY));
        let mut events = store.subscribe();
        let controller =
            WizardController::mount(registry(), store, Arc::new(Inbox::default()), options()).await;

        controller
            .store()
            .update_field("section1", "referralDate", "2026-10-01");
        assert!(!controller.next().await.is_blocked());
        controller
            .store()
            .update_field("section2", "nik", "3174091203870001");
        wait_for_save(&mut events).await;
        assert!(!controller.store().status().has_unsaved_changes);
    }

    let storage = Storage::new(&database_url).await.expect("reopen storage");
    let store = Arc::new(FormStore::new(
        Arc::new(storage.clone()),
        DEFAULT_DRAFT_KEY,
    ));
    let inbox = Arc::new(Inbox::default());
    let controller = WizardController::mount(registry(), store, inbox.clone(), options()).await;

    assert_eq!(
        controller.store().section(&"section2".into())["nik"],
        json!("3174091203870001")
    );
    assert_eq!(controller.current_index(), 0);

    let blocked = controller.submit().await.expect_err("fullName missing");
    assert_eq!(blocked.failures()[0].section.as_str(), "section2");
    assert_eq!(controller.current_index(), 1);

    controller
        .store()
        .update_field("section2", "fullName", "Siti Rahma");
    let receipt = controller.submit().await.expect("submitted");

    assert_eq!(receipt.reference.as_deref(), Some("RS-0007"));
    assert_eq!(inbox.received.lock().await.len(), 1);
    assert!(storage
        .get(DEFAULT_DRAFT_KEY)
        .await
        .expect("read draft")
        .is_none());
}
