//! Provider adapters and the per-adapter state the router reads
//!
//! Each backend family has one adapter type. All of them translate the
//! canonical [`ModelRequest`](crate::protocol::ModelRequest) into their wire
//! format, make exactly one call, and normalize the reply.

pub mod adapter;
pub mod anthropic;
pub mod error;
pub mod health;
pub mod ollama;
pub mod openai;
pub mod rate_limit;

pub use adapter::{
    Capabilities, Pricing, ProviderAdapter, ProviderConfig, ProviderKind, ResponseStream,
};
pub use anthropic::AnthropicAdapter;
pub use error::{ProviderError, ProviderResult};
pub use health::{HealthStatus, HealthTracker, ProviderHealth, ProviderMetrics};
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;
pub use rate_limit::RateLimitSnapshot;
