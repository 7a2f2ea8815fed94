//! Scripted adapter shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use canopy_core::protocol::{
    FinishReason, ModelRequest, ModelResponse, StreamEvent, TokenUsage,
};
use canopy_core::providers::{
    Capabilities, HealthTracker, Pricing, ProviderAdapter, ProviderConfig, ProviderError,
    ProviderKind, ProviderResult, ResponseStream,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the next call does
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(ProviderError),
    /// Fail the first `n` calls, then succeed
    FailFirst(u32, ProviderError),
    /// Never complete
    Hang,
}

pub struct FakeAdapter {
    config: ProviderConfig,
    health: HealthTracker,
    behavior: Mutex<Behavior>,
    latency: Duration,
    reply: String,
    calls: AtomicU32,
    available: AtomicBool,
    last_request: Mutex<Option<ModelRequest>>,
}

impl FakeAdapter {
    pub fn new(id: &str) -> Self {
        Self {
            config: ProviderConfig::new(id, ProviderKind::OpenAI, "fake-model"),
            health: HealthTracker::new(),
            behavior: Mutex::new(Behavior::Succeed),
            latency: Duration::ZERO,
            reply: format!("reply from {id}"),
            calls: AtomicU32::new(0),
            available: AtomicBool::new(true),
            last_request: Mutex::new(None),
        }
    }

    pub fn failing(self, error: ProviderError) -> Self {
        self.with_behavior(Behavior::Fail(error))
    }

    pub fn with_behavior(self, behavior: Behavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.config.pricing = pricing;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = Some(attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ModelRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// Count the call and decide its outcome
    async fn begin(&self, request: &ModelRequest) -> ProviderResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() = Some(request.clone());
        let behavior = self.behavior.lock().unwrap().clone();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(error) => Err(error),
            Behavior::FailFirst(n, error) if call <= n => Err(error),
            Behavior::FailFirst(..) => Ok(()),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn health(&self) -> &HealthTracker {
        &self.health
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn execute(&self, request: &ModelRequest) -> ProviderResult<ModelResponse> {
        self.begin(request).await?;
        let usage = TokenUsage::new(10, 5);
        let cost = self.config.pricing.cost_for(&usage, request.image_count());
        Ok(ModelResponse::new(
            self.config.id.as_str(),
            request.model_or(&self.config.default_model),
            self.reply.as_str(),
            usage,
        )
        .with_finish_reason(FinishReason::Stop)
        .with_cost(cost))
    }

    async fn execute_stream(&self, request: &ModelRequest) -> ProviderResult<ResponseStream> {
        if !self.config.capabilities.streaming {
            return Err(ProviderError::Unsupported {
                provider: self.config.id.clone(),
                feature: "streaming".to_string(),
            });
        }
        self.begin(request).await?;
        let events = vec![
            Ok(StreamEvent::Delta {
                text: "Water ".to_string(),
            }),
            Ok(StreamEvent::Delta {
                text: "weekly".to_string(),
            }),
            Ok(StreamEvent::Done {
                usage: Some(TokenUsage::new(8, 4)),
                finish_reason: Some(FinishReason::Stop),
            }),
        ];
        Ok(futures::stream::iter(events).boxed())
    }
}

pub fn server_error() -> ProviderError {
    ProviderError::ServerError {
        status_code: 503,
        message: "overloaded".to_string(),
    }
}

pub fn vision_capabilities() -> Capabilities {
    Capabilities {
        vision: true,
        ..Capabilities::default()
    }
}

pub fn streaming_capabilities() -> Capabilities {
    Capabilities {
        streaming: true,
        ..Capabilities::default()
    }
}
