//! Anthropic adapter
//!
//! Implements the adapter contract for the Messages API. Handles the
//! differences in message format: system prompts travel in a top-level
//! field, roles must alternate, and images are base64 `source` blocks.

use crate::http::{build_headers, HttpClient};
use crate::protocol::{
    FinishReason, Message, MessageRole, ModelRequest, ModelResponse, StreamEvent, TokenUsage,
};
use crate::providers::{
    HealthTracker, ProviderAdapter, ProviderConfig, ProviderError, ProviderResult,
    RateLimitSnapshot, ResponseStream,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// API version sent with every call
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory on this API
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    #[serde(default)]
    content: Vec<AnthropicContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Streaming event payloads; unknown event types are ignored
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStreamMessage,
    },
    ContentBlockDelta {
        delta: AnthropicTextDelta,
    },
    MessageDelta {
        delta: AnthropicStopDelta,
        #[serde(default)]
        usage: AnthropicUsage,
    },
    MessageStop,
    Error {
        error: AnthropicStreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicTextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStopDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamError {
    message: String,
}

/// Anthropic adapter implementation
pub struct AnthropicAdapter {
    config: ProviderConfig,
    http: HttpClient,
    health: HealthTracker,
    headers: HeaderMap,
}

impl AnthropicAdapter {
    /// Create a new Anthropic adapter; the credential is required
    pub fn new(config: ProviderConfig, http: HttpClient) -> ProviderResult<Self> {
        let api_key = config.require_api_key()?;
        let headers = build_headers([
            ("x-api-key", api_key.expose_secret().to_string()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ])?;

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

    fn build_request(&self, request: &ModelRequest, stream: bool) -> AnthropicRequest {
        let (system, messages) = convert_messages(&request.messages);
        AnthropicRequest {
            model: request.model_or(&self.config.default_model).to_string(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: request.temperature,
            stream: stream.then_some(true),
        }
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

/// Split out system prompts and merge consecutive same-role messages
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts = Vec::new();
    let mut converted: Vec<AnthropicMessage> = Vec::new();

    for message in messages {
        let role = match message.role {
            MessageRole::System => {
                system_parts.push(message.content.clone());
                continue;
            }
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };

        let mut blocks = Vec::new();
        if let Some(image) = &message.image {
            blocks.push(AnthropicBlock::Image {
                source: AnthropicImageSource {
                    source_type: "base64",
                    media_type: image.media_type.clone(),
                    data: image.data.clone(),
                },
            });
        }
        blocks.push(AnthropicBlock::Text {
            text: message.content.clone(),
        });

        match converted.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => converted.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, converted)
}

fn from_anthropic_response(provider: &str, response: AnthropicResponse) -> ModelResponse {
    let content = response
        .content
        .into_iter()
        .filter(|block| block.content_type == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    let mut normalized = ModelResponse::new(
        provider,
        response.model,
        content,
        TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens),
    );
    normalized.id = response.id;
    normalized.finish_reason = response.stop_reason.as_deref().map(FinishReason::from_backend);
    normalized
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
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

        let body = self.build_request(request, false);
        let reply = self
            .http
            .post_json(&self.url("/messages"), self.headers.clone(), &body, self.config.timeout)
            .await?;

        let snapshot = RateLimitSnapshot::from_anthropic_headers(&reply.headers);
        if !snapshot.is_empty() {
            self.health.update_rate_limit(snapshot);
        }

        let response: AnthropicResponse = serde_json::from_value(reply.body)?;
        let normalized = from_anthropic_response(self.id(), response);
        let cost = self
            .config
            .pricing
            .cost_for(&normalized.usage, request.image_count());
        debug!(provider = %self.id(), model = %normalized.model, "Anthropic call completed");

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

        let body = self.build_request(request, true);
        let response = self
            .http
            .post_stream(&self.url("/messages"), self.headers.clone(), &body, self.config.timeout)
            .await?;

        let events = Box::pin(response.bytes_stream().eventsource());
        let stream = futures::stream::unfold(
            (events, 0u32, 0u32, None::<FinishReason>, false),
            |(mut events, mut input, mut output, mut finish, done)| async move {
                if done {
                    return None;
                }
                loop {
                    let event = match events.next().await {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            let err = ProviderError::Network {
                                message: format!("Stream error: {}", e),
                            };
                            return Some((Err(err), (events, input, output, finish, true)));
                        }
                        None => {
                            let item = StreamEvent::Done {
                                usage: Some(TokenUsage::new(input, output)),
                                finish_reason: finish,
                            };
                            return Some((Ok(item), (events, input, output, None, true)));
                        }
                    };

                    match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                        Ok(AnthropicStreamEvent::MessageStart { message }) => {
                            input = message.usage.input_tokens;
                        }
                        Ok(AnthropicStreamEvent::ContentBlockDelta { delta }) => {
                            if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                                let item = StreamEvent::Delta { text };
                                return Some((Ok(item), (events, input, output, finish, false)));
                            }
                        }
                        Ok(AnthropicStreamEvent::MessageDelta { delta, usage }) => {
                            output = usage.output_tokens;
                            if let Some(reason) = delta.stop_reason {
                                finish = Some(FinishReason::from_backend(&reason));
                            }
                        }
                        Ok(AnthropicStreamEvent::MessageStop) => {
                            let item = StreamEvent::Done {
                                usage: Some(TokenUsage::new(input, output)),
                                finish_reason: finish,
                            };
                            return Some((Ok(item), (events, input, output, None, true)));
                        }
                        Ok(AnthropicStreamEvent::Error { error }) => {
                            let err = ProviderError::ServerError {
                                status_code: 500,
                                message: error.message,
                            };
                            return Some((Err(err), (events, input, output, finish, true)));
                        }
                        Ok(AnthropicStreamEvent::Other) => {}
                        Err(e) => tracing::warn!("Failed to parse stream event: {}", e),
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
