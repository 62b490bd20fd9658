//! Batch fetch contract plus the Apify actor and on-disk fixture fetchers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use roofline_storage::{HttpError, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_APIFY_BASE_URL: &str = "https://api.apify.com";

/// One provider call: which actor to run, with what input, capped at how many items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub run_id: Uuid,
    pub job_id: String,
    pub provider: String,
    pub input: JsonValue,
    pub max_items: Option<usize>,
}

/// Wholesale provider failure. The whole job is skipped; per-item problems are `MappingError`s.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("provider {provider} request failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: HttpError,
    },
    #[error("provider {provider} returned a malformed envelope: {message}")]
    MalformedEnvelope { provider: String, message: String },
    #[error("fixture batch for job {job_id} unavailable: {message}")]
    Fixture { job_id: String, message: String },
}

#[async_trait]
pub trait BatchFetcher: Send + Sync {
    /// Raw items in provider order, truncated to `max_items` when set.
    async fn fetch_batch(&self, request: &BatchRequest) -> Result<Vec<JsonValue>, FetchError>;
}

fn truncate_to_cap(mut items: Vec<JsonValue>, max_items: Option<usize>) -> Vec<JsonValue> {
    if let Some(cap) = max_items {
        items.truncate(cap);
    }
    items
}

/// Runs an Apify actor synchronously and reads its default dataset in one call.
///
/// The provider ends synchronous runs after 300 seconds, so jobs must stay small
/// enough to finish inside that window. A run that outlives it fails the job.
#[derive(Debug)]
pub struct ApifyBatchFetcher {
    http: HttpFetcher,
    base_url: String,
    token: String,
}

impl ApifyBatchFetcher {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Actor ids are `owner/name`; the REST path wants `owner~name`.
    pub fn run_items_url(&self, actor_id: &str, limit: Option<usize>) -> String {
        let mut url = format!(
            "{}/v2/acts/{}/run-sync-get-dataset-items?token={}",
            self.base_url.trim_end_matches('/'),
            actor_id.trim().replace('/', "~"),
            self.token
        );
        if let Some(limit) = limit {
            url.push_str(&format!("&limit={limit}"));
        }
        url
    }
}

pub(crate) fn parse_items_envelope(provider: &str, body: &[u8]) -> Result<Vec<JsonValue>, FetchError> {
    let value: JsonValue =
        serde_json::from_slice(body).map_err(|e| FetchError::MalformedEnvelope {
            provider: provider.to_string(),
            message: format!("invalid JSON: {e}"),
        })?;
    match value {
        JsonValue::Array(items) => Ok(items),
        other => Err(FetchError::MalformedEnvelope {
            provider: provider.to_string(),
            message: format!(
                "expected a JSON array of items, got {}",
                if other.is_object() { "an object" } else { "a scalar" }
            ),
        }),
    }
}

#[async_trait]
impl BatchFetcher for ApifyBatchFetcher {
    async fn fetch_batch(&self, request: &BatchRequest) -> Result<Vec<JsonValue>, FetchError> {
        let url = self.run_items_url(&request.provider, request.max_items);
        let response = self
            .http
            .post_json(request.run_id, &request.provider, &url, &request.input)
            .await
            .map_err(|source| FetchError::Http {
                provider: request.provider.clone(),
                source,
            })?;
        debug!(
            provider = %request.provider,
            bytes = response.body.len(),
            "actor dataset received"
        );
        let items = parse_items_envelope(&request.provider, &response.body)?;
        Ok(truncate_to_cap(items, request.max_items))
    }
}

/// Offline fetcher reading `<root>/<job_id>/items.json`.
#[derive(Debug, Clone)]
pub struct FixtureBatchFetcher {
    root: PathBuf,
}

impl FixtureBatchFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn items_path(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id).join("items.json")
    }
}

pub fn load_fixture_items(path: impl AsRef<Path>) -> Result<Vec<JsonValue>> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: JsonValue =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    match value {
        JsonValue::Array(items) => Ok(items),
        _ => bail!("{} does not hold a JSON array", path.display()),
    }
}

#[async_trait]
impl BatchFetcher for FixtureBatchFetcher {
    async fn fetch_batch(&self, request: &BatchRequest) -> Result<Vec<JsonValue>, FetchError> {
        let items = load_fixture_items(self.items_path(&request.job_id)).map_err(|e| {
            FetchError::Fixture {
                job_id: request.job_id.clone(),
                message: format!("{e:#}"),
            }
        })?;
        Ok(truncate_to_cap(items, request.max_items))
    }
}
