//! Cloudflare API v4 client
//!
//! Every response is wrapped in `{success, errors, result}`. A 2xx with
//! `success: false` is still an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shipyard_cloud::{CloudError, Result, RetryConfig, retry_with_backoff};

pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Clone)]
pub struct CloudflareClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    account_id: String,
    retry: RetryConfig,
}

impl CloudflareClient {
    pub fn new(token: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self::with_base_url(token, account_id, CLOUDFLARE_API_BASE)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        account_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            account_id: account_id.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path);
        retry_with_backoff(&self.retry, path, || {
            let request = self.http.get(&url).bearer_auth(&self.token).query(query);
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

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .put(self.url(path))
            .bearer_auth(&self.token)
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
            .http
            .patch(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    /// DELETE, treating 404 as already gone
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        retry_with_backoff(&self.retry, path, || {
            let request = self.http.delete(&url).bearer_auth(&self.token);
            async move {
                let response = request.send().await?;
                let status = response.status();
                if status.is_success() || status.as_u16() == 404 {
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

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn join_errors(errors: &[ApiError]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status().as_u16();
    let body = response.text().await?;

    if !(200..300).contains(&status) {
        return Err(CloudError::from_status(status, error_message(status, &body)));
    }

    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    if !envelope.success {
        return Err(CloudError::Api {
            status,
            message: join_errors(&envelope.errors),
        });
    }
    envelope.result.ok_or_else(|| CloudError::Api {
        status,
        message: "response carried no result".to_string(),
    })
}

fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Envelope<serde_json::Value>>(body)
        .map(|e| join_errors(&e.errors))
        .unwrap_or_else(|_| format!("HTTP {}: {}", status, body))
}
