//! Request orchestration: cache, budget, selection, retry, and fallback
//!
//! A request flows through the session history merge, the response cache,
//! the budget gate, and candidate selection. Candidates are then tried in
//! rank order; each gets its own attempt budget with backoff between
//! attempts and every attempt must pass that candidate's circuit breaker.

use crate::cache::{CacheConfig, CacheKey, ResponseCache};
use crate::config::{CanopyConfig, ConfigError, ConfigValidator};
use crate::conversation::{ConversationStore, DEFAULT_MAX_MESSAGES};
use crate::cost::{Budget, CostLedger, CostRecord};
use crate::http::HttpClient;
use crate::protocol::{
    Message, MessageRole, ModelRequest, ModelResponse, RequestKind, ResponseMetadata,
    StreamEvent, TokenUsage,
};
use crate::providers::{ProviderAdapter, ProviderError, ProviderResult, ResponseStream};
use crate::routing::circuit::CircuitBreakerConfig;
use crate::routing::error::{RouterError, RouterResult};
use crate::routing::registry::{ProviderRegistry, ProviderStatus};
use crate::routing::retry::RetryPolicy;
use crate::routing::selection::{select, Selection, SelectionCriteria};
use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A successful attempt and where it happened
struct Served<T> {
    value: T,
    index: usize,
    attempts: u32,
    latency: Duration,
    fallback_used: bool,
}

pub struct Router {
    registry: Arc<ProviderRegistry>,
    cache: Option<Arc<ResponseCache>>,
    ledger: Arc<CostLedger>,
    conversations: Arc<ConversationStore>,
    retry: RetryPolicy,
    sweep_interval: Duration,
    health_interval: Option<Duration>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Build the full graph from a loaded configuration
    ///
    /// Disabled providers are skipped.
    pub fn from_config(config: &CanopyConfig) -> RouterResult<Self> {
        ConfigValidator::new()
            .validate(config)
            .map_err(ConfigError::from)?;

        let http = HttpClient::new().map_err(|e| RouterError::Configuration(e.to_string()))?;
        let probe_timeout = Duration::from_millis(config.health_check.probe_timeout_ms);

        let mut builder = Router::builder()
            .retry_policy(RetryPolicy::from(&config.retry))
            .circuit_breaker(CircuitBreakerConfig::from(&config.circuit_breaker))
            .budget(config.budget.clone())
            .max_messages(config.conversation.max_messages)
            .health_interval(
                config
                    .health_check
                    .enabled
                    .then(|| Duration::from_secs(config.health_check.interval_secs)),
            );

        builder = if config.cache.enabled {
            builder
                .cache(CacheConfig {
                    ttl: Duration::from_secs(config.cache.ttl_secs),
                    max_entries: config.cache.max_entries,
                    max_bytes: config.cache.max_bytes,
                })
                .sweep_interval(Duration::from_secs(config.cache.sweep_interval_secs))
        } else {
            builder.without_cache()
        };

        for entry in config.providers.iter().filter(|entry| entry.enabled) {
            let adapter = entry
                .kind
                .create_adapter(entry.to_provider_config(probe_timeout), http.clone())
                .map_err(|e| RouterError::Configuration(format!("provider '{}': {}", entry.id, e)))?;
            builder = builder.register(adapter);
        }

        let router = builder.build();
        info!(providers = ?router.registry.ids(), "Router configured");
        Ok(router)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_deref()
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn snapshot(&self) -> Vec<ProviderStatus> {
        self.registry.snapshot()
    }

    pub fn reset_metrics(&self, provider: &str) -> bool {
        self.registry.reset_metrics(provider)
    }

    /// Start the cache sweeper and health probes until `shutdown` fires
    pub fn spawn_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(cache) = &self.cache {
            handles.push(cache.spawn_sweeper(self.sweep_interval, shutdown.clone()));
        }
        if let Some(interval) = self.health_interval {
            handles.extend(self.registry.spawn_health_checks(interval, shutdown));
        }
        handles
    }

    pub async fn execute(
        &self,
        request: ModelRequest,
        criteria: &SelectionCriteria,
    ) -> RouterResult<ModelResponse> {
        self.execute_with_cancel(request, criteria, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), returning `Cancelled` as soon as
    /// `token` fires
    pub async fn execute_with_cancel(
        &self,
        request: ModelRequest,
        criteria: &SelectionCriteria,
        token: CancellationToken,
    ) -> RouterResult<ModelResponse> {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let effective = self.with_history(&request);

        let cache_key = self.cache_key(&effective);
        if let Some(hit) = cache_key.as_ref().and_then(|key| self.cached(key)) {
            return Ok(self.serve_cached(hit, &request, correlation_id));
        }

        self.ledger.check_dispatch(Utc::now())?;

        let criteria = criteria.merged_with(&effective);
        let candidates = self.registry.candidates(&effective);
        let selection = select(&candidates, &effective, &criteria)?;
        info!(
            correlation_id = %correlation_id,
            candidates = selection.order.len(),
            mode = ?criteria.quality_mode,
            "Dispatching request"
        );

        let served = self
            .dispatch(
                &selection,
                &token,
                |response: &ModelResponse| (response.usage, response.cost),
                |adapter| {
                    let request = &effective;
                    async move { adapter.execute(request).await }
                },
            )
            .await?;

        let provider = self.provider_id(served.index);
        let mut response = served.value;
        response.metadata = ResponseMetadata {
            provider,
            latency_ms: served.latency.as_millis() as u64,
            cache_hit: false,
            fallback_used: served.fallback_used,
            attempts: served.attempts,
            correlation_id: Some(correlation_id),
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.set(key, response.clone());
        }
        self.ledger
            .record(CostRecord::from_response(&response, request.kind()));
        self.remember(&request, &response.content);

        info!(
            provider = %response.metadata.provider,
            latency_ms = response.metadata.latency_ms,
            attempts = response.metadata.attempts,
            fallback_used = response.metadata.fallback_used,
            cost = response.cost,
            "Request served"
        );
        Ok(response)
    }

    /// Open a streaming call
    ///
    /// Selection, breaker, and retry apply only while the stream is being
    /// opened. Cost is recorded when the `Done` event passes through.
    pub async fn stream(
        &self,
        request: ModelRequest,
        criteria: &SelectionCriteria,
    ) -> RouterResult<ResponseStream> {
        let request = request.with_stream(true);
        let effective = self.with_history(&request);

        self.ledger.check_dispatch(Utc::now())?;

        let criteria = criteria.merged_with(&effective);
        let candidates = self.registry.candidates(&effective);
        let selection = select(&candidates, &effective, &criteria)?;
        debug!(candidates = selection.order.len(), "Opening stream");

        let served = self
            .dispatch(
                &selection,
                &CancellationToken::new(),
                |_: &ResponseStream| (TokenUsage::default(), 0.0),
                |adapter| {
                    let request = &effective;
                    async move { adapter.execute_stream(request).await }
                },
            )
            .await?;

        let slot = self
            .registry
            .slot(served.index)
            .ok_or(RouterError::NoHealthyProviders)?;
        let config = slot.adapter.config();
        info!(
            provider = %config.id,
            attempts = served.attempts,
            fallback_used = served.fallback_used,
            "Stream opened"
        );

        let provider = config.id.clone();
        let model = effective.model_or(&config.default_model).to_string();
        let pricing = config.pricing.clone();
        let images = effective.image_count();
        let ledger = Arc::clone(&self.ledger);
        let conversations = Arc::clone(&self.conversations);
        let session = request.session_id.clone();
        let mut turn = turn_messages(&request);
        let mut text = String::new();

        let stream = served.value.map(move |item| {
            if let Ok(event) = &item {
                match event {
                    StreamEvent::Delta { text: delta } => text.push_str(delta),
                    StreamEvent::Done { usage, .. } => {
                        let usage = usage.unwrap_or_default();
                        let cost = pricing.cost_for(&usage, images);
                        ledger.record(CostRecord::new(
                            provider.as_str(),
                            model.as_str(),
                            usage,
                            cost,
                            RequestKind::Stream,
                        ));
                        if let Some(session) = &session {
                            let mut messages = std::mem::take(&mut turn);
                            messages.push(Message::assistant(std::mem::take(&mut text)));
                            conversations.extend(session, messages);
                        }
                    }
                }
            }
            item
        });
        Ok(stream.boxed())
    }

    /// Try candidates in rank order until one succeeds
    async fn dispatch<T, F, Fut>(
        &self,
        selection: &Selection,
        token: &CancellationToken,
        accounting: fn(&T) -> (TokenUsage, f64),
        mut call: F,
    ) -> RouterResult<Served<T>>
    where
        F: FnMut(Arc<dyn ProviderAdapter>) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempts = 0u32;
        let mut last_error: Option<ProviderError> = None;

        for (rank, &index) in selection.order.iter().enumerate() {
            let Some(slot) = self.registry.slot(index) else {
                continue;
            };
            let config = slot.adapter.config();
            let policy = match config.max_attempts {
                Some(max_attempts) => self.retry.clone().with_max_attempts(max_attempts),
                None => self.retry.clone(),
            };
            let max_attempts = policy.max_attempts.max(1);

            for attempt in 0..max_attempts {
                let admission = slot.breaker.try_acquire();
                if !admission.is_admitted() {
                    debug!(provider = slot.id(), "Circuit open, skipping provider");
                    break;
                }
                attempts += 1;

                let started = Instant::now();
                let pending = tokio::time::timeout(config.timeout, call(Arc::clone(&slot.adapter)));
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        slot.breaker.release(admission);
                        info!(provider = slot.id(), attempts, "Request cancelled");
                        return Err(RouterError::Cancelled);
                    }
                    result = pending => {
                        result.unwrap_or_else(|_| Err(ProviderError::Timeout(config.timeout)))
                    }
                };
                let latency = started.elapsed();

                match result {
                    Ok(value) => {
                        let (usage, cost) = accounting(&value);
                        slot.adapter.health().record_success(latency, &usage, cost);
                        slot.breaker.record_success(admission);
                        return Ok(Served {
                            value,
                            index,
                            attempts,
                            latency,
                            fallback_used: rank > 0 || selection.degraded,
                        });
                    }
                    Err(err) => {
                        let failures = slot
                            .adapter
                            .health()
                            .record_failure(latency, err.is_timeout());
                        let tripped = slot.breaker.record_failure(admission);
                        if tripped {
                            slot.adapter.health().mark_unhealthy();
                        }
                        warn!(
                            provider = slot.id(),
                            attempt = attempt + 1,
                            consecutive_failures = failures,
                            error = %err,
                            "Attempt failed"
                        );

                        // An open breaker rejects the next attempt, so move on now
                        let retry = !tripped && policy.should_retry(&err, attempt + 1);
                        let delay = policy.delay_after(attempt, &err);
                        last_error = Some(err);
                        if !retry {
                            break;
                        }
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                info!(provider = slot.id(), attempts, "Request cancelled");
                                return Err(RouterError::Cancelled);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        Err(match last_error {
            Some(last) => RouterError::Exhausted { attempts, last },
            None => RouterError::NoHealthyProviders,
        })
    }

    fn provider_id(&self, index: usize) -> String {
        self.registry
            .slot(index)
            .map(|slot| slot.id().to_string())
            .unwrap_or_default()
    }

    fn cache_key(&self, request: &ModelRequest) -> Option<CacheKey> {
        if self.cache.is_none() || !request.cache || request.stream {
            return None;
        }
        match CacheKey::for_request(request) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Skipping cache, request could not be keyed: {}", e);
                None
            }
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<ModelResponse> {
        self.cache.as_ref()?.get(key)
    }

    fn serve_cached(
        &self,
        mut response: ModelResponse,
        request: &ModelRequest,
        correlation_id: String,
    ) -> ModelResponse {
        if let Some(slot) = self.registry.get(response.provider()) {
            slot.adapter.health().record_cache_hit();
        }
        response.metadata = ResponseMetadata {
            provider: response.metadata.provider.clone(),
            latency_ms: 0,
            cache_hit: true,
            fallback_used: false,
            attempts: 0,
            correlation_id: Some(correlation_id),
        };
        self.remember(request, &response.content);
        debug!(provider = %response.metadata.provider, "Served from cache");
        response
    }

    /// Session history spliced between the request's system prompts and
    /// the rest of its messages
    fn with_history(&self, request: &ModelRequest) -> ModelRequest {
        let Some(session) = &request.session_id else {
            return request.clone();
        };
        let history = self.conversations.get(session);
        if history.is_empty() {
            return request.clone();
        }

        let (system, rest): (Vec<Message>, Vec<Message>) = request
            .messages
            .iter()
            .cloned()
            .partition(|m| m.role == MessageRole::System);
        let mut merged = request.clone();
        merged.messages = system.into_iter().chain(history).chain(rest).collect();
        merged
    }

    fn remember(&self, request: &ModelRequest, reply: &str) {
        if let Some(session) = &request.session_id {
            let mut messages = turn_messages(request);
            messages.push(Message::assistant(reply));
            self.conversations.extend(session, messages);
        }
    }
}

/// The caller's side of one exchange, without system prompts
fn turn_messages(request: &ModelRequest) -> Vec<Message> {
    request
        .messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .cloned()
        .collect()
}

pub struct RouterBuilder {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    breaker: CircuitBreakerConfig,
    retry: RetryPolicy,
    cache: Option<CacheConfig>,
    budget: Budget,
    max_messages: usize,
    sweep_interval: Duration,
    health_interval: Option<Duration>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            cache: Some(CacheConfig::default()),
            budget: Budget::default(),
            max_messages: DEFAULT_MAX_MESSAGES,
            sweep_interval: Duration::from_secs(300),
            health_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl RouterBuilder {
    /// Add an adapter; candidates tie-break in registration order
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// `None` disables periodic probes
    pub fn health_interval(mut self, interval: Option<Duration>) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn build(self) -> Router {
        let mut registry = ProviderRegistry::new(self.breaker);
        for adapter in self.adapters {
            registry.register(adapter);
        }
        Router {
            registry: Arc::new(registry),
            cache: self.cache.map(|config| Arc::new(ResponseCache::new(config))),
            ledger: Arc::new(CostLedger::new(self.budget)),
            conversations: Arc::new(ConversationStore::new(self.max_messages)),
            retry: self.retry,
            sweep_interval: self.sweep_interval,
            health_interval: self.health_interval,
        }
    }
}
