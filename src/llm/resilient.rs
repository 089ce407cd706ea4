//! Resilient reply generation.
//!
//! Every request walks the same tiers:
//!
//! 1. response cache
//! 2. rate-limit admission (fallback or one bounded wait when full)
//! 3. circuit breaker gate
//! 4. provider call on its own task, bounded by a hard timeout
//! 5. outcome bookkeeping
//! 6. canned fallback reply
//!
//! [`ResilientAIClient::generate`] always produces a non-empty string.
//!
//! All shared state sits in one [`ResilienceContext`]. Each resource has its
//! own `std::sync::Mutex`; no guard is ever held across an `.await`.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ConfigSource;
use crate::error::ProviderError;
use crate::llm::GenerativeProvider;
use crate::llm::cache::{ResponseCache, ResponseCacheConfig, cache_key};
use crate::llm::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig, Denied, Permit};
use crate::llm::fallback::FallbackPool;
use crate::llm::prompt::{PromptBuilder, Tone, clean_reply};
use crate::llm::rate_limit::{Admission, RateLimiter};
use crate::pipeline::types::ConversationContext;

/// Tracing target for failures an operator has to fix (bad key, bad model).
pub const OPERATOR_TARGET: &str = "autoreply::operator";

/// Why a fallback reply was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    RateLimited,
    CircuitOpen,
    Timeout,
    TransientFailure,
    NonRetryable,
}

impl FallbackReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Timeout => "timeout",
            Self::TransientFailure => "transient_failure",
            Self::NonRetryable => "non_retryable",
        }
    }
}

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum ReplySource {
    Provider,
    Cache,
    Fallback(FallbackReason),
}

impl fmt::Display for ReplySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider => f.write_str("provider"),
            Self::Cache => f.write_str("cache"),
            Self::Fallback(reason) => write!(f, "fallback ({})", reason.label()),
        }
    }
}

/// A generated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Never empty.
    pub text: String,
    pub source: ReplySource,
}

/// Tunables for [`ResilientAIClient`].
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub cache: ResponseCacheConfig,
    pub rate_limit_capacity: usize,
    pub rate_limit_window: Duration,
    pub breaker: CircuitBreakerConfig,
    pub call_timeout: Duration,
    /// Answer from the fallback pool instead of waiting when the rate
    /// window is full.
    pub fallback_mode: bool,
    pub fallback_pool: Vec<String>,
    pub tone: Tone,
    pub max_reply_words: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            cache: ResponseCacheConfig::default(),
            rate_limit_capacity: 10,
            rate_limit_window: Duration::from_secs(60),
            breaker: CircuitBreakerConfig::default(),
            call_timeout: Duration::from_secs(10),
            fallback_mode: true,
            fallback_pool: Vec::new(),
            tone: Tone::Warm,
            max_reply_words: 20,
        }
    }
}

impl ResilienceConfig {
    pub fn from_source(config: &dyn ConfigSource) -> Self {
        Self {
            cache: ResponseCacheConfig {
                ttl: config.cache_ttl(),
                max_entries: config.cache_capacity(),
            },
            rate_limit_capacity: config.rate_limit_capacity(),
            rate_limit_window: config.rate_limit_window(),
            breaker: CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold(),
                reset_timeout: config.circuit_reset_timeout(),
            },
            call_timeout: config.api_call_timeout(),
            fallback_mode: config.fallback_mode(),
            fallback_pool: config.fallback_pool().to_vec(),
            tone: config.tone(),
            max_reply_words: config.max_reply_words(),
        }
    }
}

/// Running counters, readable without touching any lock.
#[derive(Debug, Default)]
pub struct ResilienceStats {
    provider_calls: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
    transient_failures: AtomicU64,
    non_retryable_failures: AtomicU64,
    late_results_discarded: AtomicU64,
}

/// Point-in-time copy of [`ResilienceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub provider_calls: u64,
    pub cache_hits: u64,
    pub fallbacks: u64,
    pub transient_failures: u64,
    pub non_retryable_failures: u64,
    pub late_results_discarded: u64,
}

impl ResilienceStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            non_retryable_failures: self.non_retryable_failures.load(Ordering::Relaxed),
            late_results_discarded: self.late_results_discarded.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared resilience state for one provider.
pub struct ResilienceContext {
    breaker: Mutex<CircuitBreaker>,
    cache: Mutex<ResponseCache>,
    limiter: Mutex<RateLimiter>,
    fallback: Mutex<FallbackPool>,
    breaker_status: AtomicU8,
    stats: Arc<ResilienceStats>,
}

impl ResilienceContext {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            breaker: Mutex::new(CircuitBreaker::new(config.breaker.clone())),
            cache: Mutex::new(ResponseCache::new(config.cache.clone())),
            limiter: Mutex::new(RateLimiter::new(
                config.rate_limit_capacity,
                config.rate_limit_window,
            )),
            fallback: Mutex::new(FallbackPool::new(config.fallback_pool.iter().cloned())),
            breaker_status: AtomicU8::new(BreakerStatus::Closed.as_u8()),
            stats: Arc::new(ResilienceStats::default()),
        }
    }

    /// Breaker status as of the last transition.
    pub fn breaker_status(&self) -> BreakerStatus {
        BreakerStatus::from_u8(self.breaker_status.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `f` under the breaker lock and publish the resulting status.
    fn with_breaker<R>(&self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut breaker = lock(&self.breaker);
        let out = f(&mut breaker);
        self.breaker_status
            .store(breaker.status().as_u8(), Ordering::Release);
        out
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A breaker permit that is handed back if the request is dropped before an
/// outcome is recorded, so a cancelled trial cannot hold HALF_OPEN forever.
struct PermitGuard<'a> {
    ctx: &'a ResilienceContext,
    permit: Option<Permit>,
}

impl<'a> PermitGuard<'a> {
    fn new(ctx: &'a ResilienceContext, permit: Permit) -> Self {
        Self {
            ctx,
            permit: Some(permit),
        }
    }

    fn succeed(mut self) {
        if let Some(permit) = self.permit.take() {
            self.ctx.with_breaker(|b| b.record_success(permit));
        }
    }

    /// Returns `false` if the permit was stale.
    fn fail(mut self, now: Instant) -> bool {
        match self.permit.take() {
            Some(permit) => self.ctx.with_breaker(|b| b.record_failure(permit, now)),
            None => false,
        }
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.ctx.with_breaker(|b| b.release(permit));
            if permit.is_trial() {
                debug!("Trial permit released without a verdict");
            }
        }
    }
}

/// Generates replies with caching, rate limiting, circuit breaking, a hard
/// timeout and fallback.
pub struct ResilientAIClient {
    provider: Arc<dyn GenerativeProvider>,
    config: ResilienceConfig,
    ctx: ResilienceContext,
}

impl ResilientAIClient {
    pub fn new(provider: Arc<dyn GenerativeProvider>, config: ResilienceConfig) -> Self {
        let ctx = ResilienceContext::new(&config);
        Self {
            provider,
            config,
            ctx,
        }
    }

    pub fn context(&self) -> &ResilienceContext {
        &self.ctx
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.ctx.breaker_status()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats()
    }

    /// Reply text for `context`. Never fails, never empty.
    pub async fn generate(&self, context: &ConversationContext) -> String {
        self.generate_reply(context).await.text
    }

    /// Reply for `context` together with the tier that produced it.
    pub async fn generate_reply(&self, context: &ConversationContext) -> Reply {
        let key = cache_key(context);

        let cached = lock(&self.ctx.cache).get(&key, Instant::now());
        if let Some(text) = cached {
            ResilienceStats::bump(&self.ctx.stats.cache_hits);
            debug!("Reply served from cache");
            return Reply {
                text,
                source: ReplySource::Cache,
            };
        }

        let Some(reserved_at) = self.admit().await else {
            return self.fallback(FallbackReason::RateLimited);
        };

        let permit = match self.ctx.with_breaker(|b| b.acquire(Instant::now())) {
            Ok(permit) => PermitGuard::new(&self.ctx, permit),
            Err(denied) => {
                lock(&self.ctx.limiter).release(reserved_at);
                match denied {
                    Denied::Open { remaining } => {
                        debug!(remaining = ?remaining, "Circuit open, skipping provider")
                    }
                    Denied::TrialInFlight => debug!("Circuit trial in flight, skipping provider"),
                }
                return self.fallback(FallbackReason::CircuitOpen);
            }
        };

        let outcome = self
            .call_provider(context)
            .await
            .and_then(|raw| {
                let text = clean_reply(&raw, &context.persona);
                if text.is_empty() {
                    Err(ProviderError::InvalidResponse {
                        provider: self.provider.name().to_string(),
                        reason: "reply empty after cleanup".to_string(),
                    })
                } else {
                    Ok(text)
                }
            });

        match outcome {
            Ok(text) => {
                permit.succeed();
                lock(&self.ctx.cache).insert(key, text.clone(), Instant::now());
                info!(chars = text.chars().count(), "Provider reply received");
                Reply {
                    text,
                    source: ReplySource::Provider,
                }
            }
            Err(e) if e.is_transient() => {
                ResilienceStats::bump(&self.ctx.stats.transient_failures);
                let counted = permit.fail(Instant::now());
                warn!(
                    provider = self.provider.name(),
                    kind = e.label(),
                    counted,
                    error = %e,
                    "Provider call failed"
                );
                let reason = match e {
                    ProviderError::Timeout { .. } => FallbackReason::Timeout,
                    _ => FallbackReason::TransientFailure,
                };
                self.fallback(reason)
            }
            Err(e) => {
                ResilienceStats::bump(&self.ctx.stats.non_retryable_failures);
                drop(permit);
                error!(
                    target: OPERATOR_TARGET,
                    provider = self.provider.name(),
                    kind = e.label(),
                    error = %e,
                    "Provider rejected the call; check credentials and model settings"
                );
                self.fallback(FallbackReason::NonRetryable)
            }
        }
    }

    /// Reserve a rate-limit slot, waiting once for the window to drain
    /// unless fallback mode is on.
    async fn admit(&self) -> Option<Instant> {
        let first = lock(&self.ctx.limiter).try_acquire(Instant::now());
        let retry_in = match first {
            Admission::Reserved(at) => return Some(at),
            Admission::Full { retry_in } => retry_in,
        };

        if self.config.fallback_mode {
            debug!(retry_in = ?retry_in, "Rate window full, using fallback");
            return None;
        }

        let wait = retry_in.min(self.config.rate_limit_window);
        debug!(wait = ?wait, "Rate window full, waiting for a slot");
        tokio::time::sleep(wait).await;

        let second = lock(&self.ctx.limiter).try_acquire(Instant::now());
        match second {
            Admission::Reserved(at) => Some(at),
            Admission::Full { .. } => {
                debug!("Rate window still full after waiting");
                None
            }
        }
    }

    /// Run the provider on its own task and wait at most `call_timeout`.
    ///
    /// On timeout the task is left running; its result lands in a closed
    /// oneshot and is counted as discarded.
    async fn call_provider(&self, context: &ConversationContext) -> Result<String, ProviderError> {
        let system_prompt = PromptBuilder {
            persona: context.persona.clone(),
            language: context.language_hint,
            tone: self.config.tone,
            max_words: self.config.max_reply_words,
        }
        .system_prompt();
        let lines = context.lines.clone();
        let provider = Arc::clone(&self.provider);
        let stats = Arc::clone(&self.ctx.stats);
        let (tx, rx) = oneshot::channel();

        ResilienceStats::bump(&self.ctx.stats.provider_calls);
        tokio::spawn(async move {
            let result = provider.complete(&system_prompt, &lines).await;
            if tx.send(result).is_err() {
                ResilienceStats::bump(&stats.late_results_discarded);
                debug!(provider = provider.name(), "Discarded late provider result");
            }
        });

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProviderError::Transient {
                provider: self.provider.name().to_string(),
                reason: "provider task ended without a result".to_string(),
            }),
            Err(_) => Err(ProviderError::Timeout {
                provider: self.provider.name().to_string(),
                after: self.config.call_timeout,
            }),
        }
    }

    fn fallback(&self, reason: FallbackReason) -> Reply {
        ResilienceStats::bump(&self.ctx.stats.fallbacks);
        let text = lock(&self.ctx.fallback).next();
        info!(reason = reason.label(), "Using fallback reply");
        Reply {
            text,
            source: ReplySource::Fallback(reason),
        }
    }
}
