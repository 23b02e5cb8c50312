use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use std::time::Duration;
use tracing::{debug, instrument};

use super::types::{ChatCompletionRequest, MessagesRequest};
use crate::domain::models::{CompletionRequest, ModelConfig, ModelProvider, ModelResponse, RetryConfig};
use crate::domain::ports::errors::ModelError;
use crate::domain::ports::ModelService;
use crate::infrastructure::retry::RetryPolicy;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// HTTP client for completion services
///
/// Features:
/// - Connection pooling and reuse (via `reqwest::Client`)
/// - Exponential backoff retry for rate limits, 5xx and network errors
/// - Both response shapes normalized through [`ModelResponse`]
pub struct HttpModelClient {
    http_client: ReqwestClient,
    provider: ModelProvider,
    api_key: String,
    base_url: String,
    retry_policy: RetryPolicy<ModelError>,
}

impl HttpModelClient {
    /// Create a client for the configured provider
    ///
    /// `retry` supplies the backoff schedule; the attempt budget comes from
    /// `config.max_attempts`.
    pub fn new(config: &ModelConfig, retry: &RetryConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            provider: config.provider,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_policy: RetryPolicy::from_config(retry, ModelError::is_transient)
                .with_max_attempts(config.max_attempts),
        })
    }

    fn request_builder(&self, request: &CompletionRequest) -> reqwest::RequestBuilder {
        match self.provider {
            ModelProvider::OpenAi => {
                let builder = self
                    .http_client
                    .post(format!("{}/v1/chat/completions", self.base_url))
                    .json(&ChatCompletionRequest::from(request));
                if self.api_key.is_empty() {
                    builder
                } else {
                    builder.bearer_auth(&self.api_key)
                }
            }
            ModelProvider::Anthropic => self
                .http_client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&MessagesRequest::from(request)),
        }
    }

    /// Send one request and decode the response
    async fn send_request(&self, request: &CompletionRequest) -> Result<ModelResponse, ModelError> {
        let response = self.request_builder(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(ModelError::from_status(status, body));
        }

        let body = response.text().await?;
        let parsed: ModelResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }
}

#[async_trait]
impl ModelService for HttpModelClient {
    fn supports_multi_sample(&self) -> bool {
        self.provider == ModelProvider::OpenAi
    }

    #[instrument(skip(self, request), fields(model = %request.model, n = request.n), err)]
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse, ModelError> {
        let response = self
            .retry_policy
            .execute("model.complete", || self.send_request(request))
            .await?;
        debug!("completion received");
        Ok(response)
    }
}
