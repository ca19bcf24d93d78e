// Authenticated calls against the Terra backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::session::SessionManager;
use crate::state::{GenerationModel, GenerationRequest, GenerationStatus};

pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: &str, session: Arc<SessionManager>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a bearer-authenticated request.
    ///
    /// A `401` triggers one refresh through the session manager and at most
    /// one retry with the new token. `build` is called once per attempt.
    async fn send_authorized<F>(&self, endpoint: &'static str, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let Some(token) = self.session.access_token() else {
            return Err(ApiError::NoCredential);
        };

        let resp = build(&self.http).bearer_auth(&token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_status(endpoint, resp);
        }

        tracing::info!(endpoint, "access token rejected; refreshing");
        if !self.session.refresh_after_rejection(&token).await {
            return Err(ApiError::SessionExpired);
        }
        let Some(token) = self.session.access_token() else {
            return Err(ApiError::SessionExpired);
        };

        let resp = build(&self.http).bearer_auth(&token).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(endpoint, "refreshed token rejected");
            return Err(ApiError::SessionExpired);
        }
        check_status(endpoint, resp)
    }

    pub async fn fetch_models(&self) -> Result<Vec<GenerationModel>, ApiError> {
        let url = self.url("/private/models");
        let resp = self.send_authorized("models", |http| http.get(&url)).await?;
        let bytes = resp.bytes().await?;
        let wire: ModelsResponse = serde_json::from_slice(&bytes)?;
        Ok(wire.into_models())
    }

    /// Start a generation batch; returns the batch's request id.
    pub async fn submit_generation(
        &self,
        prompt: &str,
        model_id: &str,
        num_images: u32,
    ) -> Result<String, ApiError> {
        let url = self.url("/generate");
        let body = GenerateBody {
            prompt,
            model: model_id,
            num_images,
        };
        let resp = self
            .send_authorized("generate", |http| http.post(&url).json(&body))
            .await?;
        let bytes = resp.bytes().await?;
        let wire: GenerateResponse = serde_json::from_slice(&bytes)?;
        Ok(wire.request_id.into_string())
    }

    /// Fetch the user's history, optionally scoped to one generation batch.
    ///
    /// Items come back in server order, normalised but not reordered.
    pub async fn fetch_history(
        &self,
        request_id: Option<&str>,
    ) -> Result<Vec<GenerationRequest>, ApiError> {
        let url = self.url("/private/history");
        let resp = self
            .send_authorized("history", |http| {
                let req = http.get(&url);
                match request_id {
                    Some(id) => req.query(&[("requestId", id)]),
                    None => req,
                }
            })
            .await?;
        let bytes = resp.bytes().await?;
        let wire: HistoryResponse = serde_json::from_slice(&bytes)?;
        Ok(normalize_history(wire.into_items()))
    }
}

fn check_status(endpoint: &'static str, resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        tracing::warn!(endpoint, status = %status, "request returned non-success");
        Err(ApiError::Status {
            status: status.as_u16(),
        })
    }
}

// ── Wire types ─────────────────────────────────────────────────────────────

/// Ids arrive as JSON strings in some backend revisions and numbers in others.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum WireTimestamp {
    Unix(i64),
    Text(String),
}

impl WireTimestamp {
    fn unix_seconds(&self) -> Option<i64> {
        match self {
            WireTimestamp::Unix(secs) => Some(*secs),
            WireTimestamp::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp())
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .map(|dt| dt.and_utc().timestamp())
                })
                .ok(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    prompt: &'a str,
    model: &'a str,
    num_images: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(alias = "request_id")]
    request_id: WireId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelsResponse {
    Bare(Vec<ModelItem>),
    Wrapped { models: Vec<ModelItem> },
}

impl ModelsResponse {
    fn into_models(self) -> Vec<GenerationModel> {
        let items = match self {
            ModelsResponse::Bare(items) => items,
            ModelsResponse::Wrapped { models } => models,
        };
        items
            .into_iter()
            .map(|m| GenerationModel {
                id: m.id.into_string(),
                name: m.name,
                description: m.description,
                image_url: m.image_url.filter(|u| !u.is_empty()),
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelItem {
    id: WireId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "image_url")]
    image_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryResponse {
    Bare(Vec<HistoryItem>),
    Wrapped { images: Vec<HistoryItem> },
}

impl HistoryResponse {
    fn into_items(self) -> Vec<HistoryItem> {
        match self {
            HistoryResponse::Bare(items) => items,
            HistoryResponse::Wrapped { images } => images,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct HistoryItem {
    id: WireId,
    #[serde(default, alias = "request_id")]
    request_id: Option<WireId>,
    #[serde(default)]
    prompt: String,
    status: String,
    #[serde(default, alias = "created_at")]
    created_at: Option<WireTimestamp>,
    #[serde(default)]
    url: Option<String>,
}

/// Map wire items onto `GenerationRequest`, enforcing `url.is_some() ==
/// completed` and id uniqueness (first occurrence wins).
fn normalize_history(items: Vec<HistoryItem>) -> Vec<GenerationRequest> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let id = item.id.into_string();
        let status = match item.status.trim().to_ascii_lowercase().as_str() {
            "pending" => GenerationStatus::Pending,
            "completed" => GenerationStatus::Completed,
            other => {
                tracing::warn!(id = %id, status = other, "skipping history item with unknown status");
                continue;
            }
        };
        let url = match status {
            GenerationStatus::Pending => None,
            GenerationStatus::Completed => match item.url.filter(|u| !u.is_empty()) {
                Some(u) => Some(u),
                None => {
                    tracing::warn!(id = %id, "skipping completed history item without url");
                    continue;
                }
            },
        };
        if !seen.insert(id.clone()) {
            tracing::debug!(id = %id, "dropping duplicate history item");
            continue;
        }
        out.push(GenerationRequest {
            id,
            request_id: item.request_id.map(WireId::into_string),
            prompt: item.prompt,
            status,
            created_at: item
                .created_at
                .as_ref()
                .and_then(WireTimestamp::unix_seconds)
                .unwrap_or(0),
            url,
        });
    }
    out
}
