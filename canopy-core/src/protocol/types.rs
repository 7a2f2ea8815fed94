//! Canonical request and response types
//!
//! These are the only shapes the orchestration core exposes to callers.
//! Every adapter translates to and from them; nothing backend-specific
//! appears here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions that guide the model's behavior
    System,
    /// User input message
    User,
    /// Assistant (model) response
    Assistant,
}

impl MessageRole {
    /// Wire name shared by every supported backend
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single embedded image, already base64 encoded by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/jpeg`
    pub media_type: String,

    /// Base64 payload without a `data:` prefix
    pub data: String,
}

impl ImageAttachment {
    pub fn new(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Render as a `data:` URL
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Text content
    pub content: String,

    /// Optional image attached to this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Attach an image to this message
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Response format hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free text
    #[default]
    Text,
    /// A single JSON object
    Json,
}

/// Kind of request, used for cost accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Text,
    Vision,
    Stream,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Text => "text",
            RequestKind::Vision => "vision",
            RequestKind::Stream => "stream",
        }
    }
}

/// A logical model request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Messages in the conversation, in order
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Model override; the serving adapter's default model is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature (0.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Streaming requested
    #[serde(default)]
    pub stream: bool,

    /// Response format hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Caller-supplied correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Conversation session whose history is merged into this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Set to false to bypass the response cache for this call
    #[serde(default = "default_true")]
    pub cache: bool,
}

fn default_true() -> bool {
    true
}

impl ModelRequest {
    /// Create a new request with the given messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            cache: true,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Whether any message carries an image
    pub fn has_image(&self) -> bool {
        self.messages.iter().any(Message::has_image)
    }

    pub fn image_count(&self) -> usize {
        self.messages.iter().filter(|m| m.has_image()).count()
    }

    pub fn wants_json(&self) -> bool {
        self.response_format == Some(ResponseFormat::Json)
    }

    pub fn kind(&self) -> RequestKind {
        if self.stream {
            RequestKind::Stream
        } else if self.has_image() {
            RequestKind::Vision
        } else {
            RequestKind::Text
        }
    }

    /// Rough prompt size in tokens (four characters per token)
    pub fn estimated_prompt_tokens(&self) -> u32 {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        (chars as u32).div_ceil(4)
    }

    /// Model to send, falling back to the adapter default
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Normalized finish reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    /// Map the vocabularies of the supported backends onto one set
    pub fn from_backend(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" | "refusal" => FinishReason::ContentFilter,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Serving metadata attached to every response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Id of the backend that produced the content
    pub provider: String,

    /// Latency of the successful attempt
    pub latency_ms: u64,

    /// Served from the response cache
    pub cache_hit: bool,

    /// Served by a candidate other than the top-ranked one, or after the
    /// soft selection limits had to be relaxed
    pub fallback_used: bool,

    /// Attempts made across all candidates
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// A normalized model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Unique response id
    pub id: String,

    /// Model that generated the content
    pub model: String,

    /// Generated text
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Token usage information
    pub usage: TokenUsage,

    /// Computed cost in USD
    pub cost: f64,

    pub metadata: ResponseMetadata,
}

impl ModelResponse {
    /// Create a response with a generated id
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            id: format!("resp-{}", Uuid::new_v4()),
            model: model.into(),
            content: content.into(),
            finish_reason: None,
            usage,
            cost: 0.0,
            metadata: ResponseMetadata {
                provider: provider.into(),
                ..Default::default()
            },
        }
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn provider(&self) -> &str {
        &self.metadata.provider
    }
}

/// One item of a streaming response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text
    Delta { text: String },
    /// End of stream
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind() {
        let text = ModelRequest::new(vec![Message::user("hi")]);
        assert_eq!(text.kind(), RequestKind::Text);

        let vision = ModelRequest::new(vec![
            Message::user("what is this?").with_image(ImageAttachment::new("image/png", "AAAA"))
        ]);
        assert_eq!(vision.kind(), RequestKind::Vision);
        assert_eq!(vision.image_count(), 1);

        let stream = vision.clone().with_stream(true);
        assert_eq!(stream.kind(), RequestKind::Stream);
    }

    #[test]
    fn test_finish_reason_vocabulary() {
        assert_eq!(FinishReason::from_backend("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_backend("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::from_backend("tool_use"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from_backend("weird"),
            FinishReason::Other("weird".to_string())
        );
    }

    #[test]
    fn test_request_cache_flag_defaults_on() {
        let request: ModelRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert!(request.cache);
        assert!(!request.stream);
        assert!(!request.without_cache().cache);
    }

    #[test]
    fn test_estimated_prompt_tokens() {
        let request = ModelRequest::new(vec![Message::user("12345678")]);
        assert_eq!(request.estimated_prompt_tokens(), 2);
    }
}
