//! Cloud provider error types

use shipyard_remote::RemoteError;
use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("Server creation failed: {0}")]
    ServerCreation(String),

    #[error("Volume error: {0}")]
    Volume(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Timeout: {operation} did not complete after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Remote execution error: {0}")]
    Remote(#[from] RemoteError),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Uniform HTTP status mapping shared by every REST adapter
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => CloudError::Authentication(message),
            404 => CloudError::NotFound(message),
            409 => CloudError::Conflict(message),
            422 => CloudError::Validation(message),
            429 => CloudError::RateLimit(message),
            _ => CloudError::Api { status, message },
        }
    }

    /// Transient failures worth another attempt with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::RateLimit(_) => true,
            CloudError::Api { status, .. } => *status >= 500,
            CloudError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            CloudError::from_status(401, "bad token"),
            CloudError::Authentication(_)
        ));
        assert!(matches!(
            CloudError::from_status(403, "forbidden"),
            CloudError::Authentication(_)
        ));
        assert!(CloudError::from_status(404, "gone").is_not_found());
        assert!(matches!(
            CloudError::from_status(409, "exists"),
            CloudError::Conflict(_)
        ));
        assert!(matches!(
            CloudError::from_status(422, "invalid"),
            CloudError::Validation(_)
        ));
        assert!(matches!(
            CloudError::from_status(429, "slow down"),
            CloudError::RateLimit(_)
        ));
        assert!(matches!(
            CloudError::from_status(500, "oops"),
            CloudError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(CloudError::from_status(429, "").is_retryable());
        assert!(CloudError::from_status(503, "").is_retryable());
        assert!(!CloudError::from_status(422, "").is_retryable());
        assert!(!CloudError::Volume("x".into()).is_retryable());
    }
}
