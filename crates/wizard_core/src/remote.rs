use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use shared::{domain::FormState, error::ApiError};
use url::Url;

/// Optional server-side mirror of the local draft.
#[async_trait]
pub trait RemoteDraftSync: Send + Sync {
    async fn save(&self, state: &FormState) -> Result<()>;
}

/// Receives the completed form on submit.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn complete(&self, state: FormState) -> Result<SubmissionReceipt>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub reference: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

pub struct MissingCompletionHandler;

#[async_trait]
impl CompletionHandler for MissingCompletionHandler {
    async fn complete(&self, _state: FormState) -> Result<SubmissionReceipt> {
        Err(anyhow!("completion handler is unavailable"))
    }
}

#[derive(Debug, Serialize)]
struct DraftSyncRequest<'a> {
    draft_key: &'a str,
    data: &'a FormState,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    data: &'a FormState,
}

#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    reference: Option<String>,
}

/// Posts the draft to an HTTP endpoint as `{draft_key, data}`.
pub struct HttpDraftSync {
    http: Client,
    endpoint: Url,
    draft_key: String,
}

impl HttpDraftSync {
    pub fn new(endpoint: &str, draft_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)
                .with_context(|| format!("invalid draft sync endpoint '{endpoint}'"))?,
            draft_key: draft_key.into(),
        })
    }
}

#[async_trait]
impl RemoteDraftSync for HttpDraftSync {
    async fn save(&self, state: &FormState) -> Result<()> {
        let res = self
            .http
            .post(self.endpoint.clone())
            .json(&DraftSyncRequest {
                draft_key: &self.draft_key,
                data: state,
            })
            .send()
            .await
            .context("draft sync request failed")?;
        reject_error_status(res, "draft sync").await?;
        Ok(())
    }
}

/// Posts the completed form as `{data}` and reads `{reference}` back.
pub struct HttpCompletionHandler {
    http: Client,
    endpoint: Url,
}

impl HttpCompletionHandler {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)
                .with_context(|| format!("invalid submission endpoint '{endpoint}'"))?,
        })
    }
}

#[async_trait]
impl CompletionHandler for HttpCompletionHandler {
    async fn complete(&self, state: FormState) -> Result<SubmissionReceipt> {
        let res = self
            .http
            .post(self.endpoint.clone())
            .json(&SubmitRequest { data: &state })
            .send()
            .await
            .context("submission request failed")?;
        let res = reject_error_status(res, "submission").await?;
        let body = res.text().await.context("failed to read submission response")?;
        let parsed = if body.trim().is_empty() {
            SubmitResponse::default()
        } else {
            serde_json::from_str(&body).context("malformed submission response")?
        };
        Ok(SubmissionReceipt {
            reference: parsed.reference,
            submitted_at: Utc::now(),
        })
    }
}

async fn reject_error_status(res: Response, action: &str) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => {
            Err(anyhow::Error::new(api_error).context(format!("{action} rejected with status {status}")))
        }
        Err(_) => Err(anyhow!("{action} rejected with status {status}")),
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
