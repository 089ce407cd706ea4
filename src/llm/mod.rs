//! Reply generation.
//!
//! The engine talks to exactly one generative backend through
//! [`GenerativeProvider`]. [`ResilientAIClient`] wraps it with a response
//! cache, a sliding-window rate limiter, a circuit breaker, a hard call
//! timeout and a canned-reply fallback tier.

pub mod cache;
pub mod circuit_breaker;
pub mod cohere;
pub mod fallback;
pub mod prompt;
pub mod rate_limit;
pub mod resilient;

pub use cache::{ResponseCache, ResponseCacheConfig};
pub use circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
pub use cohere::CohereProvider;
pub use fallback::FallbackPool;
pub use prompt::{PromptBuilder, Tone};
pub use rate_limit::RateLimiter;
pub use resilient::{
    FallbackReason, Reply, ReplySource, ResilienceConfig, ResilienceStats, ResilientAIClient,
    StatsSnapshot,
};

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::ConfigSource;
use crate::error::ProviderError;

/// A remote text-generation backend.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Produce a reply to the last of `context_lines`.
    async fn complete(
        &self,
        system_prompt: &str,
        context_lines: &[String],
    ) -> Result<String, ProviderError>;
}

/// Create the Cohere provider from configuration.
pub fn create_provider(config: &dyn ConfigSource, api_key: SecretString) -> Arc<dyn GenerativeProvider> {
    tracing::info!("Using Cohere (model: {})", config.model());
    Arc::new(CohereProvider::new(
        api_key,
        config.model(),
        config.temperature(),
    ))
}
