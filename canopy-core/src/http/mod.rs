//! HTTP layer shared by every adapter
//!
//! Handles:
//! - Connection pooling and client management
//! - Per-call timeouts
//! - Status and body error mapping with retry hints
//! - Request ID generation for correlation

pub mod client;
pub mod error;

pub use client::{HttpClient, JsonReply};
pub use error::{map_http_error, parse_retry_after};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::providers::ProviderError;

/// Build a header map from name/value pairs, rejecting invalid values
pub fn build_headers<'a, I>(pairs: I) -> Result<HeaderMap, ProviderError>
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ProviderError::Configuration(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| ProviderError::Configuration(format!("Invalid value for header {}", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
