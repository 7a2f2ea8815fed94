//! Ollama adapter
//!
//! Talks to a local Ollama server through `/api/chat`. No credential is
//! needed. Streaming replies are newline-delimited JSON, one object per line.

use crate::http::HttpClient;
use crate::protocol::{
    FinishReason, Message, ModelRequest, ModelResponse, ResponseFormat, StreamEvent, TokenUsage,
};
use crate::providers::{
    HealthTracker, ProviderAdapter, ProviderConfig, ProviderError, ProviderResult, ResponseStream,
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    /// Raw base64 payloads, no data-URL prefix
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    message: Option<OllamaReplyMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaReplyMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChatResponse {
    fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_eval_count, self.eval_count)
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.done_reason.as_deref().map(FinishReason::from_backend)
    }
}

fn to_ollama_message(message: &Message) -> OllamaMessage {
    OllamaMessage {
        role: message.role.as_str(),
        content: message.content.clone(),
        images: message
            .image
            .iter()
            .map(|image| image.data.clone())
            .collect(),
    }
}

fn to_ollama_request(request: &ModelRequest, model: &str, stream: bool) -> OllamaChatRequest {
    let options = (request.temperature.is_some() || request.max_tokens.is_some()).then(|| {
        OllamaOptions {
            temperature: request.temperature,
            num_predict: request.max_tokens,
        }
    });

    OllamaChatRequest {
        model: model.to_string(),
        messages: request.messages.iter().map(to_ollama_message).collect(),
        stream,
        options,
        format: matches!(request.response_format, Some(ResponseFormat::Json)).then_some("json"),
    }
}

/// Adapter for a local Ollama server
pub struct OllamaAdapter {
    config: ProviderConfig,
    http: HttpClient,
    health: HealthTracker,
}

impl OllamaAdapter {
    pub fn new(config: ProviderConfig, http: HttpClient) -> Self {
        Self {
            config,
            http,
            health: HealthTracker::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn health(&self) -> &HealthTracker {
        &self.health
    }

    async fn is_available(&self) -> bool {
        self.http
            .probe(&self.url("/api/tags"), HeaderMap::new(), self.config.probe_timeout)
            .await
    }

    async fn execute(&self, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        let model = request.model_or(&self.config.default_model);
        let body = to_ollama_request(request, model, false);
        let reply = self
            .http
            .post_json(&self.url("/api/chat"), HeaderMap::new(), &body, self.config.timeout)
            .await?;

        let response: OllamaChatResponse = serde_json::from_value(reply.body)?;
        if let Some(error) = response.error {
            return Err(ProviderError::ServerError {
                status_code: 500,
                message: error,
            });
        }

        let usage = response.usage();
        let finish_reason = response.finish_reason();
        let content = response.message.map(|m| m.content).unwrap_or_default();
        let model = if response.model.is_empty() {
            model.to_string()
        } else {
            response.model
        };

        let mut normalized = ModelResponse::new(self.id(), model, content, usage);
        normalized.finish_reason = finish_reason;
        let cost = self
            .config
            .pricing
            .cost_for(&normalized.usage, request.image_count());
        debug!(provider = %self.id(), model = %normalized.model, "Ollama call completed");

        Ok(normalized.with_cost(cost))
    }

    async fn execute_stream(&self, request: &ModelRequest) -> ProviderResult<ResponseStream> {
        if !self.config.capabilities.streaming {
            return Err(ProviderError::Unsupported {
                provider: self.id().to_string(),
                feature: "streaming".to_string(),
            });
        }

        let model = request.model_or(&self.config.default_model);
        let body = to_ollama_request(request, model, true);
        let response = self
            .http
            .post_stream(&self.url("/api/chat"), HeaderMap::new(), &body, self.config.timeout)
            .await?;

        Ok(parse_ndjson_stream(response.bytes_stream()))
    }
}

/// Split a byte stream into lines and decode one chat chunk per line
///
/// Lines are buffered as raw bytes and only decoded once complete, so a
/// character split across network chunks survives.
fn parse_ndjson_stream<S, B, E>(bytes: S) -> ResponseStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let bytes = Box::pin(bytes.fuse());

    let stream = futures::stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match decode_raw_line(&line) {
                        Ok(Some(event)) => {
                            let finished = matches!(event, StreamEvent::Done { .. });
                            return Some((Ok(event), (bytes, buffer, finished)));
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (bytes, buffer, true))),
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        let err = ProviderError::Network {
                            message: format!("Stream error: {}", e),
                        };
                        return Some((Err(err), (bytes, buffer, true)));
                    }
                    None => {
                        // Trailing line without a newline
                        let rest = std::mem::take(&mut buffer);
                        if let Ok(Some(event)) = decode_raw_line(&rest) {
                            let finished = matches!(event, StreamEvent::Done { .. });
                            return Some((Ok(event), (bytes, buffer, finished)));
                        }
                        let item = StreamEvent::Done {
                            usage: None,
                            finish_reason: None,
                        };
                        return Some((Ok(item), (bytes, buffer, true)));
                    }
                }
            }
        },
    );

    Box::pin(stream)
}

fn decode_raw_line(line: &[u8]) -> ProviderResult<Option<StreamEvent>> {
    let line = std::str::from_utf8(line)
        .map_err(|e| ProviderError::Parse(format!("Invalid UTF-8 in stream: {}", e)))?
        .trim();
    if line.is_empty() {
        return Ok(None);
    }
    decode_line(line)
}

fn decode_line(line: &str) -> ProviderResult<Option<StreamEvent>> {
    let chunk: OllamaChatResponse = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::ServerError {
            status_code: 500,
            message: error,
        });
    }
    if chunk.done {
        return Ok(Some(StreamEvent::Done {
            usage: Some(chunk.usage()),
            finish_reason: chunk.finish_reason(),
        }));
    }
    Ok(chunk
        .message
        .map(|m| m.content)
        .filter(|text| !text.is_empty())
        .map(|text| StreamEvent::Delta { text }))
}
