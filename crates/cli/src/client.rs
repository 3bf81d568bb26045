//! API client for the governor daemon

use anyhow::{Context, Result};
use governor_lib::history::HistorySummary;
use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the governor daemon's API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    async fn send(&self, method: Method, path: &str) -> Result<Response> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Invalid API path: {}", path))?;
        self.client
            .request(method, url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))
    }

    /// Turn a non-2xx answer into an error carrying the daemon's message
    async fn ensure_success(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => parsed.error,
            Err(_) => body,
        };
        anyhow::bail!("API error ({}): {}", status, message)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json()
            .await
            .context("Unexpected response body from daemon")
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path).await?;
        Self::decode(Self::ensure_success(response).await?).await
    }

    /// GET a plain-text body
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let response = self.send(Method::GET, path).await?;
        Self::ensure_success(response)
            .await?
            .text()
            .await
            .context("Failed to read response text")
    }

    /// GET that keeps the body of error statuses; `/healthz` and `/readyz`
    /// answer 503 with a JSON document
    pub async fn probe<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path).await?;
        Self::decode(response).await
    }

    /// POST without a body, used by the optimize and export triggers
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::POST, path).await?;
        Self::decode(Self::ensure_success(response).await?).await
    }
}

// API response types not shared with governor-lib

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub environment: String,
    pub storage_engine: String,
    pub ready: bool,
    pub parallelism_ceiling: usize,
    pub active_tests: usize,
    pub max_connections: Option<u32>,
    pub skip_conditions: usize,
    pub tests_skipped: u64,
    pub tests_recorded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse<T> {
    pub summary: HistorySummary,
    pub events: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub format: String,
    pub path: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
