//! OpenAI adapter implementation

use super::converter::{from_openai_response, to_openai_request};
use super::streaming::parse_stream;
use super::types::OpenAIResponse;
use crate::http::{build_headers, HttpClient};
use crate::protocol::{ModelRequest, ModelResponse};
use crate::providers::{
    HealthTracker, ProviderAdapter, ProviderConfig, ProviderError, ProviderResult,
    RateLimitSnapshot, ResponseStream,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use tracing::debug;

/// Adapter for OpenAI and OpenAI-compatible endpoints
pub struct OpenAIAdapter {
    config: ProviderConfig,
    http: HttpClient,
    health: HealthTracker,
    headers: HeaderMap,
}

impl OpenAIAdapter {
    /// Create a new OpenAI adapter; the credential is required
    pub fn new(config: ProviderConfig, http: HttpClient) -> ProviderResult<Self> {
        let api_key = config.require_api_key()?;
        let headers = build_headers([(
            "authorization",
            format!("Bearer {}", api_key.expose_secret()),
        )])?;

        Ok(Self {
            config,
            http,
            health: HealthTracker::new(),
            headers,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn ensure_quota(&self) -> ProviderResult<()> {
        match self.health.rate_limit_wait() {
            Some(wait) => Err(ProviderError::RateLimit {
                retry_after: Some(wait),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn health(&self) -> &HealthTracker {
        &self.health
    }

    async fn is_available(&self) -> bool {
        self.http
            .probe(&self.url("/models"), self.headers.clone(), self.config.probe_timeout)
            .await
    }

    async fn execute(&self, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        self.ensure_quota()?;

        let model = request.model_or(&self.config.default_model);
        let body = to_openai_request(request, model, false);
        let reply = self
            .http
            .post_json(
                &self.url("/chat/completions"),
                self.headers.clone(),
                &body,
                self.config.timeout,
            )
            .await?;

        let snapshot = RateLimitSnapshot::from_openai_headers(&reply.headers, Utc::now());
        if !snapshot.is_empty() {
            self.health.update_rate_limit(snapshot);
        }

        let response: OpenAIResponse = serde_json::from_value(reply.body)?;
        let normalized = from_openai_response(self.id(), response)?;
        let cost = self
            .config
            .pricing
            .cost_for(&normalized.usage, request.image_count());
        debug!(provider = %self.id(), model = %normalized.model, "OpenAI call completed");

        Ok(normalized.with_cost(cost))
    }

    async fn execute_stream(&self, request: &ModelRequest) -> ProviderResult<ResponseStream> {
        if !self.config.capabilities.streaming {
            return Err(ProviderError::Unsupported {
                provider: self.id().to_string(),
                feature: "streaming".to_string(),
            });
        }
        self.ensure_quota()?;

        let model = request.model_or(&self.config.default_model);
        let body = to_openai_request(request, model, true);
        let response = self
            .http
            .post_stream(
                &self.url("/chat/completions"),
                self.headers.clone(),
                &body,
                self.config.timeout,
            )
            .await?;

        Ok(parse_stream(response))
    }
}
