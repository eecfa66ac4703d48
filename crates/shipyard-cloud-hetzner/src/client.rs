//! Hetzner Cloud API client
//!
//! Thin Bearer-token wrapper over the REST API. Reads and deletes are retried
//! on transient failures; creates are not, since a retried POST can leave a
//! duplicate behind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shipyard_cloud::{CloudError, Result, RetryConfig, retry_with_backoff};

pub const HETZNER_API_BASE: &str = "https://api.hetzner.cloud/v1";

#[derive(Debug, Clone)]
pub struct HetznerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryConfig,
}

impl HetznerClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, HETZNER_API_BASE)
    }

    /// Point the client at another endpoint (mock servers in tests)
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        retry_with_backoff(&self.retry, path, || {
            let request = self.http.get(&url).bearer_auth(&self.token);
            async move { decode(request.send().await?).await }
        })
        .await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        retry_with_backoff(&self.retry, path, || {
            let request = self.http.delete(&url).bearer_auth(&self.token);
            async move {
                let response = request.send().await?;
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let body = response.text().await.unwrap_or_default();
                Err(CloudError::from_status(
                    status.as_u16(),
                    error_message(status.as_u16(), &body),
                ))
            }
        })
        .await
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CloudError::from_status(
        status.as_u16(),
        error_message(status.as_u16(), &body),
    ))
}

/// `{"error": {"message": ...}}` when present, else the raw body
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status, body))
}
