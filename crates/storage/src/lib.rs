use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::Mutex;
use tracing::debug;

use shared::draft::Draft;

/// Persistence collaborator for wizard drafts.
///
/// `get` distinguishes a missing draft (`Ok(None)`) from one that exists but
/// cannot be read (`Err`), so callers can log corruption separately.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Draft>>;
    async fn set(&self, key: &str, draft: &Draft) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn list_keys(&self) -> Result<Vec<DraftSummary>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSummary {
    pub key: String,
    pub saved_at: DateTime<Utc>,
}

/// Keeps serialized drafts in process memory.
///
/// Drafts are stored as JSON text so reads go through the same decoding path
/// as durable stores.
#[derive(Default)]
pub struct MemoryDraftStore {
    drafts: Mutex<HashMap<String, String>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an arbitrary payload under `key`, bypassing encoding.
    pub async fn put_raw(&self, key: &str, payload: impl Into<String>) {
        self.drafts
            .lock()
            .await
            .insert(key.to_string(), payload.into());
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.drafts.lock().await.contains_key(key)
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn get(&self, key: &str) -> Result<Option<Draft>> {
        let guard = self.drafts.lock().await;
        let Some(raw) = guard.get(key) else {
            return Ok(None);
        };
        let draft = Draft::from_json(raw)
            .with_context(|| format!("stored draft '{key}' is not valid draft JSON"))?;
        Ok(Some(draft))
    }

    async fn set(&self, key: &str, draft: &Draft) -> Result<()> {
        let payload = draft.to_json().context("failed to encode draft")?;
        self.drafts.lock().await.insert(key.to_string(), payload);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.drafts.lock().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<DraftSummary>> {
        let guard = self.drafts.lock().await;
        let mut summaries = guard
            .iter()
            .filter_map(|(key, raw)| {
                Draft::from_json(raw).ok().map(|draft| DraftSummary {
                    key: key.clone(),
                    saved_at: draft.timestamp,
                })
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }
}

/// SQLite-backed draft store.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open draft database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Deletes drafts last saved before `cutoff`; returns how many were removed.
    pub async fn purge_saved_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM wizard_drafts WHERE saved_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to purge stale drafts")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DraftStore for Storage {
    async fn get(&self, key: &str) -> Result<Option<Draft>> {
        let row = sqlx::query("SELECT payload FROM wizard_drafts WHERE draft_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read draft '{key}'"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.try_get(0)?;
        let draft = Draft::from_json(&payload)
            .with_context(|| format!("stored draft '{key}' is not valid draft JSON"))?;
        Ok(Some(draft))
    }

    async fn set(&self, key: &str, draft: &Draft) -> Result<()> {
        let payload = draft.to_json().context("failed to encode draft")?;
        sqlx::query(
            "INSERT INTO wizard_drafts (draft_key, payload, saved_at, updated_at) VALUES (?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(draft_key) DO UPDATE SET payload = excluded.payload, saved_at = excluded.saved_at, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(payload)
        .bind(draft.timestamp)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write draft '{key}'"))?;
        debug!(draft_key = key, saved_at = %draft.timestamp, "draft row written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM wizard_drafts WHERE draft_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete draft '{key}'"))?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<DraftSummary>> {
        let rows = sqlx::query("SELECT draft_key, saved_at FROM wizard_drafts ORDER BY draft_key")
            .fetch_all(&self.pool)
            .await
            .context("failed to list drafts")?;
        rows.into_iter()
            .map(|row| -> Result<DraftSummary> {
                Ok(DraftSummary {
                    key: row.try_get(0)?,
                    saved_at: row.try_get(1)?,
                })
            })
            .collect()
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
