use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;
use shared::{
    domain::{FieldError, FormState, SectionData, SectionId, ValidationResult},
    draft::Draft,
};
use storage::{DraftStore, Storage};

#[tokio::test]
async fn draft_survives_reopening_database_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("drafts.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let mut identity = SectionData::new();
    identity.insert("nik".into(), json!("3174000000000001"));
    identity.insert("fullName".into(), json!("Siti Rahma"));
    let data: FormState = [(SectionId::from("section2"), identity)]
        .into_iter()
        .collect();
    let mut validation = BTreeMap::new();
    validation.insert(
        SectionId::from("section3"),
        ValidationResult::invalid(vec![FieldError::new("diagnosisDate", "required")]),
    );
    let draft = Draft::new(data, Utc::now(), validation);

    {
        let storage = Storage::new(&database_url).await.expect("open");
        storage.set("intake:patient-7", &draft).await.expect("save");
    }

    assert!(db_path.exists(), "database file should exist");

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let loaded = reopened
        .get("intake:patient-7")
        .await
        .expect("read")
        .expect("draft present");
    assert_eq!(loaded, draft);

    let keys = reopened.list_keys().await.expect("list");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].key, "intake:patient-7");
}
