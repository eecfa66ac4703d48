//! Scaleway API client
//!
//! One client covers the Instance, VPC and Block APIs; callers pass the
//! versioned path (`/instance/v1/zones/...`). Authenticates with the
//! `X-Auth-Token` header.

use serde::Serialize;
use serde::de::DeserializeOwned;
use shipyard_cloud::{CloudError, Result, RetryConfig, retry_with_backoff};

pub const SCALEWAY_API_BASE: &str = "https://api.scaleway.com";

#[derive(Debug, Clone)]
pub struct ScalewayClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    retry: RetryConfig,
}

impl ScalewayClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self::with_base_url(secret_key, SCALEWAY_API_BASE)
    }

    pub fn with_base_url(secret_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Auth-Token", &self.secret_key)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        retry_with_backoff(&self.retry, path, || {
            let request = self.request(reqwest::Method::GET, path);
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
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .request(reqwest::Method::PATCH, path)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    /// PATCH a raw `text/plain` body (server user data)
    pub async fn patch_text(&self, path: &str, body: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::PATCH, path)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body.to_string())
            .send()
            .await?;
        check(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        retry_with_backoff(&self.retry, path, || {
            let request = self.request(reqwest::Method::DELETE, path);
            async move { check(request.send().await?).await }
        })
        .await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    Err(failure(status.as_u16(), response).await)
}

async fn check(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(failure(status.as_u16(), response).await)
}

async fn failure(status: u16, response: reqwest::Response) -> CloudError {
    let body = response.text().await.unwrap_or_default();
    CloudError::from_status(status, error_message(status, &body))
}

/// Scaleway errors carry a top-level `message`
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(404, r#"{"message":"resource is not found","type":"not_found"}"#),
            "resource is not found"
        );
        assert_eq!(error_message(500, "oops"), "HTTP 500: oops");
    }
}
