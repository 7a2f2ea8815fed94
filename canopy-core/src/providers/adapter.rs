//! Provider adapter trait, static provider description, and pricing
//!
//! An adapter owns the translation between the canonical request/response
//! shape and exactly one backend. Retry, fallback, and breaker logic live in
//! the router; adapters make one call per `execute`.

use crate::config::SecretString;
use crate::protocol::{ModelRequest, ModelResponse, StreamEvent, TokenUsage};
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::health::HealthTracker;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Stream of events produced by a streaming call
pub type ResponseStream = BoxStream<'static, ProviderResult<StreamEvent>>;

/// Core provider trait that all backends implement
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Unique id of this adapter instance
    fn id(&self) -> &str {
        &self.config().id
    }

    /// Immutable description of the backend
    fn config(&self) -> &ProviderConfig;

    /// Live health and metrics for this adapter
    fn health(&self) -> &HealthTracker;

    /// Cheap liveness probe; never errors outward
    async fn is_available(&self) -> bool;

    /// Perform one call against the backend
    async fn execute(&self, request: &ModelRequest) -> ProviderResult<ModelResponse>;

    /// Open one streaming call against the backend
    async fn execute_stream(&self, request: &ModelRequest) -> ProviderResult<ResponseStream> {
        let _ = request;
        Err(ProviderError::Unsupported {
            provider: self.id().to_string(),
            feature: "streaming".to_string(),
        })
    }
}

/// Backend families with a built-in adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI or any OpenAI-compatible endpoint
    OpenAI,
    Anthropic,
    /// Local Ollama server
    Ollama,
}

impl ProviderKind {
    /// Create an adapter for this kind
    pub fn create_adapter(
        &self,
        config: ProviderConfig,
        http: crate::http::HttpClient,
    ) -> ProviderResult<Arc<dyn ProviderAdapter>> {
        Ok(match self {
            ProviderKind::OpenAI => Arc::new(crate::providers::OpenAIAdapter::new(config, http)?),
            ProviderKind::Anthropic => {
                Arc::new(crate::providers::AnthropicAdapter::new(config, http)?)
            }
            ProviderKind::Ollama => Arc::new(crate::providers::OllamaAdapter::new(config, http)),
        })
    }

    pub fn requires_credential(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }
}

/// Declared capabilities of a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub text: bool,

    /// Accepts an embedded image
    #[serde(default)]
    pub vision: bool,

    #[serde(default)]
    pub streaming: bool,

    #[serde(default)]
    pub function_calling: bool,

    /// Native JSON response mode
    #[serde(default)]
    pub json_mode: bool,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Context window in tokens
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    #[serde(default)]
    pub batching: bool,

    #[serde(default)]
    pub realtime: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            text: true,
            vision: false,
            streaming: false,
            function_calling: false,
            json_mode: false,
            max_tokens: default_max_tokens(),
            context_window: default_context_window(),
            batching: false,
            realtime: false,
        }
    }
}

/// Cost per 1K tokens, in USD
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pricing {
    #[serde(default)]
    pub input_per_1k: f64,

    #[serde(default)]
    pub output_per_1k: f64,

    /// Flat cost per embedded image
    #[serde(default)]
    pub per_image: Option<f64>,
}

impl Pricing {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
            per_image: None,
        }
    }

    /// Cost of a finished call
    pub fn cost_for(&self, usage: &TokenUsage, images: usize) -> f64 {
        let tokens = (usage.prompt_tokens as f64 / 1000.0) * self.input_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.output_per_1k;
        tokens + self.per_image.unwrap_or(0.0) * images as f64
    }

    /// Pre-dispatch estimate for ranking by cost
    pub fn estimate(&self, request: &ModelRequest, default_output_tokens: u32) -> f64 {
        let output = request.max_tokens.unwrap_or(default_output_tokens);
        let usage = TokenUsage::new(request.estimated_prompt_tokens(), output);
        self.cost_for(&usage, request.image_count())
    }
}

/// Immutable description of one backend
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub default_model: String,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Attempts per routing round; `None` uses the router default
    pub max_attempts: Option<u32>,
    /// Bound on `is_available`
    pub probe_timeout: Duration,
    pub capabilities: Capabilities,
    pub pricing: Pricing,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, kind: ProviderKind, default_model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: kind.default_base_url().to_string(),
            api_key: None,
            default_model: default_model.into(),
            timeout: Duration::from_secs(30),
            max_attempts: None,
            probe_timeout: Duration::from_secs(5),
            capabilities: Capabilities::default(),
            pricing: Pricing::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// The credential, or a configuration error for backends that need one
    pub(crate) fn require_api_key(&self) -> ProviderResult<&SecretString> {
        self.api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ProviderError::Configuration(format!("provider '{}' has no api_key", self.id))
            })
    }
}

fn default_true() -> bool {
    true
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> u32 {
    8192
}
