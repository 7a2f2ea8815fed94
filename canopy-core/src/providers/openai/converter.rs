//! Conversion between the canonical protocol and OpenAI format

use super::types::*;
use crate::protocol::{
    FinishReason, Message, ModelRequest, ModelResponse, ResponseFormat, TokenUsage,
};
use crate::providers::ProviderError;

/// Convert a canonical request to OpenAI format
pub fn to_openai_request(request: &ModelRequest, model: &str, stream: bool) -> OpenAIRequest {
    OpenAIRequest {
        model: model.to_string(),
        messages: request.messages.iter().map(to_openai_message).collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: stream.then_some(true),
        stream_options: stream.then_some(OpenAIStreamOptions {
            include_usage: true,
        }),
        response_format: request.response_format.map(|format| OpenAIResponseFormat {
            format_type: match format {
                ResponseFormat::Text => "text".to_string(),
                ResponseFormat::Json => "json_object".to_string(),
            },
        }),
    }
}

/// Images become `image_url` parts carrying a data URL
fn to_openai_message(message: &Message) -> OpenAIMessage {
    let content = match &message.image {
        None => OpenAIContent::Text(message.content.clone()),
        Some(image) => OpenAIContent::Parts(vec![
            OpenAIContentPart::Text {
                text: message.content.clone(),
            },
            OpenAIContentPart::ImageUrl {
                image_url: OpenAIImageUrl {
                    url: image.data_url(),
                },
            },
        ]),
    };

    OpenAIMessage {
        role: message.role.as_str().to_string(),
        content: Some(content),
    }
}

/// Convert an OpenAI response to canonical format
pub fn from_openai_response(
    provider: &str,
    response: OpenAIResponse,
) -> Result<ModelResponse, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("response contained no choices".to_string()))?;

    let content = match choice.message.content {
        Some(OpenAIContent::Text(text)) => text,
        Some(OpenAIContent::Parts(parts)) => parts
            .into_iter()
            .filter_map(|part| match part {
                OpenAIContentPart::Text { text } => Some(text),
                OpenAIContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        None => String::new(),
    };

    let mut normalized = ModelResponse::new(
        provider,
        response.model,
        content,
        response.usage.map(from_openai_usage).unwrap_or_default(),
    );
    if let Some(id) = response.id {
        normalized.id = id;
    }
    if let Some(reason) = choice.finish_reason {
        normalized.finish_reason = Some(FinishReason::from_backend(&reason));
    }
    Ok(normalized)
}

pub fn from_openai_usage(usage: OpenAIUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage
            .total_tokens
            .unwrap_or(usage.prompt_tokens + usage.completion_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ImageAttachment;
    use serde_json::json;

    #[test]
    fn test_image_becomes_data_url_part() {
        let request = ModelRequest::new(vec![
            Message::system("You grade leaves."),
            Message::user("Any deficiency?").with_image(ImageAttachment::new("image/jpeg", "QUJD")),
        ])
        .with_response_format(ResponseFormat::Json);

        let wire = serde_json::to_value(to_openai_request(&request, "gpt-4o", false)).unwrap();
        assert_eq!(wire["model"], "gpt-4o");
        assert_eq!(wire["messages"][0]["content"], "You grade leaves.");
        assert_eq!(wire["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(
            wire["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
        assert_eq!(wire["response_format"]["type"], "json_object");
        assert!(wire.get("stream").is_none());
    }

    #[test]
    fn test_stream_request_asks_for_usage() {
        let request = ModelRequest::new(vec![Message::user("hi")]);
        let wire = serde_json::to_value(to_openai_request(&request, "gpt-4o", true)).unwrap();
        assert_eq!(wire["stream"], true);
        assert_eq!(wire["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_from_openai_response() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Water less."}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let response: OpenAIResponse = serde_json::from_value(body).unwrap();
        let normalized = from_openai_response("openai", response).unwrap();

        assert_eq!(normalized.id, "chatcmpl-1");
        assert_eq!(normalized.content, "Water less.");
        assert_eq!(normalized.finish_reason, Some(FinishReason::Length));
        assert_eq!(normalized.usage, TokenUsage::new(12, 3));
        assert_eq!(normalized.provider(), "openai");
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let response: OpenAIResponse =
            serde_json::from_value(json!({"model": "m", "choices": []})).unwrap();
        assert!(matches!(
            from_openai_response("openai", response),
            Err(ProviderError::Parse(_))
        ));
    }
}
