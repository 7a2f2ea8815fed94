//! HTTP client implementation using reqwest

use crate::http::error::map_http_error;
use crate::providers::ProviderError;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum response size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("canopy-core/", env!("CARGO_PKG_VERSION"));

/// A successful JSON reply with the headers adapters mine for rate limits
#[derive(Debug, Clone)]
pub struct JsonReply {
    pub headers: HeaderMap,
    pub body: Value,
}

/// Shared HTTP client with connection pooling
#[derive(Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: Arc<Client>,

    /// Maximum response size to prevent OOM
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_config(Duration::from_secs(10), 10)
    }

    /// Create a new HTTP client with custom configuration
    ///
    /// Request timeouts are applied per call, not on the client.
    pub fn with_config(connect_timeout: Duration, max_idle_per_host: usize) -> Result<Self, ProviderError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    /// POST a JSON body and parse a JSON reply
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
        timeout: Duration,
    ) -> Result<JsonReply, ProviderError> {
        let request_id = Uuid::new_v4();
        debug!("POST {} [request_id: {}]", url, request_id);

        let response = self
            .client
            .post(url)
            .headers(headers)
            .header("X-Request-ID", request_id.to_string())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let response = Self::check_status(response).await?;
        self.check_content_length(&response)?;

        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        if text.len() > self.max_response_size {
            return Err(ProviderError::Parse(format!(
                "Response size {} exceeds maximum {} [request_id: {}]",
                text.len(),
                self.max_response_size,
                request_id
            )));
        }

        let body = serde_json::from_str(&text).map_err(|e| {
            warn!("Invalid JSON from {} [request_id: {}]: {}", url, request_id, e);
            ProviderError::Parse(format!("Invalid response format: {}", e))
        })?;

        Ok(JsonReply { headers, body })
    }

    /// POST a JSON body and hand back the raw successful response for streaming
    pub async fn post_stream<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
        timeout: Duration,
    ) -> Result<Response, ProviderError> {
        debug!("POST (stream) {}", url);

        // The overall timeout bounds connection setup and first byte only;
        // a long generation must not be cut off mid-stream.
        let response = tokio::time::timeout(
            timeout,
            self.client.post(url).headers(headers).json(body).send(),
        )
        .await
        .map_err(|_| ProviderError::Timeout(timeout))?
        .map_err(|e| map_transport_error(e, timeout))?;

        Self::check_status(response).await
    }

    /// GET a URL and report whether it answered with a 2xx status
    pub async fn probe(&self, url: &str, headers: HeaderMap, timeout: Duration) -> bool {
        match self.client.get(url).headers(headers).timeout(timeout).send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                if !ok {
                    debug!("Probe {} answered {}", url, response.status());
                }
                ok
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }

    async fn check_status(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.ok();
        warn!("Request failed with status {}", status);
        Err(map_http_error(status, &headers, body))
    }

    /// Check response size to prevent OOM
    fn check_content_length(&self, response: &Response) -> Result<(), ProviderError> {
        if let Some(content_length) = response.content_length() {
            if content_length as usize > self.max_response_size {
                return Err(ProviderError::Parse(format!(
                    "Response size {} exceeds maximum {}",
                    content_length, self.max_response_size
                )));
            }
        }

        Ok(())
    }
}

/// Map a reqwest transport failure onto the adapter error taxonomy
pub(crate) fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_connect() {
        ProviderError::Network {
            message: format!("Connection failed: {}", err),
        }
    } else if err.is_decode() || err.is_body() {
        ProviderError::Parse(err.to_string())
    } else {
        ProviderError::Network {
            message: err.to_string(),
        }
    }
}
