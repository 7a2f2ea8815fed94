//! Streaming support for OpenAI responses

use super::converter::from_openai_usage;
use super::types::OpenAIStreamChunk;
use crate::protocol::{FinishReason, StreamEvent, TokenUsage};
use crate::providers::{ProviderError, ResponseStream};
use eventsource_stream::Eventsource;
use futures::StreamExt;

/// Parse the Server-Sent Events stream of a chat completion
///
/// Text deltas are forwarded as they arrive; usage and finish reason are
/// collected and emitted once as the final `Done` event.
pub fn parse_stream(response: reqwest::Response) -> ResponseStream {
    let events = Box::pin(response.bytes_stream().eventsource());

    let stream = futures::stream::unfold(
        (events, None::<TokenUsage>, None::<FinishReason>, false),
        |(mut events, mut usage, mut finish, done)| async move {
            if done {
                return None;
            }
            loop {
                match events.next().await {
                    Some(Ok(event)) => {
                        // The last message is "data: [DONE]"
                        if event.data == "[DONE]" {
                            let item = StreamEvent::Done {
                                usage,
                                finish_reason: finish,
                            };
                            return Some((Ok(item), (events, None, None, true)));
                        }

                        match serde_json::from_str::<OpenAIStreamChunk>(&event.data) {
                            Ok(chunk) => {
                                if let Some(u) = chunk.usage {
                                    usage = Some(from_openai_usage(u));
                                }
                                let mut text = String::new();
                                for choice in chunk.choices {
                                    if let Some(reason) = choice.finish_reason {
                                        finish = Some(FinishReason::from_backend(&reason));
                                    }
                                    if let Some(content) = choice.delta.content {
                                        text.push_str(&content);
                                    }
                                }
                                if !text.is_empty() {
                                    let item = StreamEvent::Delta { text };
                                    return Some((Ok(item), (events, usage, finish, false)));
                                }
                            }
                            Err(e) => {
                                // Log parsing error but continue stream
                                tracing::warn!("Failed to parse stream chunk: {}", e);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let err = ProviderError::Network {
                            message: format!("Stream error: {}", e),
                        };
                        return Some((Err(err), (events, usage, finish, true)));
                    }
                    None => {
                        // Connection closed without [DONE]
                        let item = StreamEvent::Done {
                            usage,
                            finish_reason: finish,
                        };
                        return Some((Ok(item), (events, None, None, true)));
                    }
                }
            }
        },
    );

    Box::pin(stream)
}
