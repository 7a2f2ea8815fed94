//! HTTP error mapping utilities

use crate::providers::ProviderError;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Map HTTP status code and response body to a ProviderError
pub fn map_http_error(status: StatusCode, headers: &HeaderMap, body: Option<String>) -> ProviderError {
    // Try to parse error details from response body
    let error_details = body
        .as_ref()
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| extract_error_details(&v));

    let error_message = error_details
        .as_ref()
        .map(|d| d.message.clone())
        .or_else(|| body.clone().filter(|b| !b.is_empty()))
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(error_message)
        }

        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = headers
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
                .or_else(|| {
                    error_details
                        .and_then(|d| d.retry_after_seconds)
                        .map(Duration::from_secs)
                });

            ProviderError::RateLimit { retry_after }
        }

        StatusCode::NOT_FOUND => ProviderError::ModelNotAvailable {
            model: extract_model_from_error(&error_message).unwrap_or_else(|| "unknown".to_string()),
        },

        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Timeout(Duration::ZERO)
        }

        status if status.is_server_error() => ProviderError::ServerError {
            status_code: status.as_u16(),
            message: error_message,
        },

        _ => ProviderError::InvalidRequest {
            message: format!("HTTP {}: {}", status.as_u16(), error_message),
        },
    }
}

/// Error details extracted from response body
struct ErrorDetails {
    message: String,
    retry_after_seconds: Option<u64>,
}

/// Extract error details from JSON response
fn extract_error_details(json: &Value) -> Option<ErrorDetails> {
    // OpenAI and Anthropic: { "error": { "message": "...", "type": "..." } }
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: error.get("retry_after").and_then(|v| v.as_u64()),
            });
        }
        // Ollama: { "error": "..." }
        if let Some(message) = error.as_str() {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: None,
            });
        }
    }

    if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
        return Some(ErrorDetails {
            message: message.to_string(),
            retry_after_seconds: json.get("retry_after").and_then(|v| v.as_u64()),
        });
    }

    None
}

/// Try to extract model name from error message
fn extract_model_from_error(message: &str) -> Option<String> {
    for quote in ['\'', '"', '`'] {
        let needle = format!("model {}", quote);
        if let Some(start) = message.find(&needle) {
            let start = start + needle.len();
            if let Some(end) = message[start..].find(quote) {
                return Some(message[start..start + end].to_string());
            }
        }
    }

    None
}

/// Parse Retry-After header value (seconds only)
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    header_value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
