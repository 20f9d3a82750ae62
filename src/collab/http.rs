//! HTTP collaborator backend
//!
//! POSTs each request as JSON to `{base_url}/{role}` and parses the JSON reply.
//! 202 means pending, 429 carries a retry-after hint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::*;
use super::{CiRunner, CodeGenerator, PullRequestHost, Reviewer};
use crate::error::{CyclrError, Result};

/// Default environment variable holding the bearer token
const DEFAULT_TOKEN_ENV: &str = "CYCLR_TOKEN";

/// Retry-after used when a 429 carries no usable header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// HTTP backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    pub base_url: String,
    /// Environment variable holding a bearer token (optional)
    pub token_env: String,
    /// Request timeout in milliseconds (default: 300000)
    pub timeout_ms: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_ms: 300_000,
        }
    }
}

/// Collaborator backend talking to an HTTP service
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
    config: HttpBackendConfig,
}

impl HttpBackend {
    /// Create a backend; reads the token from `token_env` if set
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        Self::with_token(config, token)
    }

    /// Create a backend with an explicit token
    pub fn with_token(config: HttpBackendConfig, token: Option<String>) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(CyclrError::Collaborator("http backend needs a base_url".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CyclrError::Collaborator(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            config,
        })
    }

    fn endpoint(&self, role: &str) -> String {
        format!("{}/{}", self.base_url, role)
    }

    async fn post<Req, Resp>(&self, role: &str, request: &Req) -> CollabResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut builder = self.client.post(self.endpoint(role)).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout(Duration::from_millis(self.config.timeout_ms))
            } else {
                CollaboratorError::Network(format!("{} request failed: {}", role, e))
            }
        })?;

        let status = response.status();

        // Handle rate limiting
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(CollaboratorError::RateLimited {
                retry_after: Some(Duration::from_secs(retry_after)),
            });
        }

        if status == StatusCode::ACCEPTED {
            return Err(CollaboratorError::Pending(format!("{} accepted, not finished", role)));
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CollaboratorError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(format!("{} returned invalid JSON: {}", role, e)))
    }
}

#[async_trait]
impl CodeGenerator for HttpBackend {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<RawGeneration> {
        self.post("generate", request).await
    }
}

#[async_trait]
impl PullRequestHost for HttpBackend {
    async fn create_pull_request(&self, request: &PullRequestRequest) -> CollabResult<RawPullRequest> {
        self.post("create_pull_request", request).await
    }

    async fn apply_fix(&self, request: &FixRequest) -> CollabResult<RawAck> {
        self.post("apply_fix", request).await
    }

    async fn close_pull_request(&self, request: &CloseRequest) -> CollabResult<RawAck> {
        self.post("close_pull_request", request).await
    }

    async fn post_comment(&self, request: &CommentRequest) -> CollabResult<RawAck> {
        self.post("post_comment", request).await
    }
}

#[async_trait]
impl CiRunner for HttpBackend {
    async fn trigger_ci(&self, request: &PullRequestRef) -> CollabResult<RawCiStatus> {
        self.post("trigger_ci", request).await
    }
}

#[async_trait]
impl Reviewer for HttpBackend {
    async fn request_review(&self, request: &PullRequestRef) -> CollabResult<RawReview> {
        self.post("request_review", request).await
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpBackendConfig::default();
        assert!(config.base_url.is_empty());
        assert_eq!(config.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(config.timeout_ms, 300_000);
    }

    #[test]
    fn test_requires_base_url() {
        assert!(HttpBackend::with_token(HttpBackendConfig::default(), None).is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = HttpBackendConfig {
            base_url: "http://localhost:8080/api/".into(),
            ..Default::default()
        };
        let backend = HttpBackend::with_token(config, None).unwrap();
        assert_eq!(backend.endpoint("trigger_ci"), "http://localhost:8080/api/trigger_ci");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let config = HttpBackendConfig {
            // Port 9 (discard) is closed on any sane test host
            base_url: "http://127.0.0.1:9".into(),
            timeout_ms: 2_000,
            ..Default::default()
        };
        let backend = HttpBackend::with_token(config, Some("t".into())).unwrap();
        let request = PullRequestRef {
            issue_id: "ABC-1".into(),
            pr_id: "1".into(),
        };
        let err = backend.trigger_ci(&request).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
