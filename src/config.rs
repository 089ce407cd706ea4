//! Configuration types.
//!
//! Everything the engine reads is exposed through the read-only
//! [`ConfigSource`] trait. [`BotConfig`] is the stock implementation: defaults
//! overlaid with `AUTOREPLY_*` environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::prompt::Tone;
use crate::pipeline::types::LanguageHint;
use crate::surface::{DeliveryTarget, RegionBounds};

/// Prefix shared by every environment variable the engine reads.
const ENV_PREFIX: &str = "AUTOREPLY_";

/// Separator for list-valued variables (the fallback pool).
const LIST_SEPARATOR: char = '|';

/// Accepted range for the provider call timeout.
const MIN_API_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_API_TIMEOUT: Duration = Duration::from_secs(60);

/// Default persona-consistent replies used when the provider is unavailable.
pub const DEFAULT_FALLBACK_RESPONSES: &[&str] = &[
    "Hey! Kya chal raha hai? 😊",
    "Arey yaar, abhi thoda busy hoon. Thodi der baad baat karte hain?",
    "Haan bhai, bol?",
    "Acha, samajh gaya. Koi baat nahi!",
    "Haha, mazak kar raha tha yaar! 😂",
    "Kya plan hai aaj ka?",
    "Sab theek? Kuch problem hai kya?",
    "Sorry, thoda late ho gaya reply karne mein!",
    "Bilkul sahi keh raha hai tu!",
    "Arey waah! Kya baat hai! 👍",
    "Chal, thodi der baad baat karte hain.",
    "Haan, main free hoon. Bata?",
    "Mil ke baat karenge iske baare mein.",
    "Arre koi nahi, next time pakka!",
    "Sahi hai yaar! 🔥",
];

/// Read-only view of the engine configuration.
pub trait ConfigSource: Send + Sync {
    /// Pause between poll cycles.
    fn check_interval(&self) -> Duration;
    /// Minimum gap between two surface captures.
    fn debounce(&self) -> Duration;
    /// Minimum gap between two delivered replies.
    fn min_response_interval(&self) -> Duration;
    /// Trailing window used to detect rapid-fire exchanges.
    fn burst_window(&self) -> Duration;
    /// Messages tolerated inside `burst_window` before backing off.
    fn burst_threshold(&self) -> usize;
    fn max_context_lines(&self) -> usize;
    fn min_message_chars(&self) -> usize;
    fn dedup_capacity(&self) -> usize;
    fn cache_ttl(&self) -> Duration;
    fn cache_capacity(&self) -> usize;
    fn rate_limit_capacity(&self) -> usize;
    fn rate_limit_window(&self) -> Duration;
    fn circuit_failure_threshold(&self) -> u32;
    fn circuit_reset_timeout(&self) -> Duration;
    fn api_call_timeout(&self) -> Duration;
    fn persona_name(&self) -> &str;
    fn language_hint(&self) -> LanguageHint;
    fn tone(&self) -> Tone;
    fn max_reply_words(&self) -> usize;
    fn temperature(&self) -> f32;
    fn model(&self) -> &str;
    fn fallback_pool(&self) -> &[String];
    /// When the rate window is full, answer from the fallback tier instead
    /// of waiting for a slot.
    fn fallback_mode(&self) -> bool;
    fn delivery_attempts(&self) -> u32;
    fn delivery_retry_pause(&self) -> Duration;
    fn chat_region(&self) -> RegionBounds;
    fn message_box(&self) -> &DeliveryTarget;
    /// Reply to the conversation already on screen when the engine starts.
    fn reply_to_existing_on_start(&self) -> bool;
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub check_interval: Duration,
    pub debounce: Duration,
    pub min_response_interval: Duration,
    pub burst_window: Duration,
    pub burst_threshold: usize,
    pub max_context_lines: usize,
    pub min_message_chars: usize,
    pub dedup_capacity: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub rate_limit_capacity: usize,
    pub rate_limit_window: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout: Duration,
    pub api_call_timeout: Duration,
    pub persona_name: String,
    pub language_hint: LanguageHint,
    pub tone: Tone,
    pub max_reply_words: usize,
    pub temperature: f32,
    pub model: String,
    pub fallback_pool: Vec<String>,
    pub fallback_mode: bool,
    pub delivery_attempts: u32,
    pub delivery_retry_pause: Duration,
    pub chat_region: RegionBounds,
    pub message_box: DeliveryTarget,
    pub reply_to_existing_on_start: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(4),
            debounce: Duration::from_secs(1),
            min_response_interval: Duration::from_secs(8),
            burst_window: Duration::from_secs(60),
            burst_threshold: 6,
            max_context_lines: 20,
            min_message_chars: 2,
            dedup_capacity: 128,
            cache_ttl: Duration::from_secs(600), // 10 minutes
            cache_capacity: 256,
            rate_limit_capacity: 10,
            rate_limit_window: Duration::from_secs(60),
            circuit_failure_threshold: 5,
            circuit_reset_timeout: Duration::from_secs(30),
            api_call_timeout: Duration::from_secs(10),
            persona_name: "Nitesh".to_string(),
            language_hint: LanguageHint::HindiEnglish,
            tone: Tone::Warm,
            max_reply_words: 20,
            temperature: 0.75,
            model: "command-a-03-2025".to_string(),
            fallback_pool: DEFAULT_FALLBACK_RESPONSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fallback_mode: true,
            delivery_attempts: 3,
            delivery_retry_pause: Duration::from_millis(500),
            chat_region: RegionBounds {
                x: 400,
                y: 100,
                width: 800,
                height: 800,
            },
            message_box: DeliveryTarget::Coordinate { x: 652, y: 950 },
            reply_to_existing_on_start: false,
        }
    }
}

impl BotConfig {
    /// Build a configuration from defaults overlaid with process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from defaults overlaid with values returned by
    /// `lookup` (keyed by full variable name, e.g. `AUTOREPLY_PERSONA`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let d = Self::default();

        let fallback_pool = match env.get("FALLBACK_RESPONSES") {
            Some(raw) => raw
                .split(LIST_SEPARATOR)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => d.fallback_pool,
        };

        Ok(Self {
            check_interval: env.secs("CHECK_INTERVAL_SECS", d.check_interval)?,
            debounce: env.secs("DEBOUNCE_SECS", d.debounce)?,
            min_response_interval: env
                .secs("MIN_RESPONSE_INTERVAL_SECS", d.min_response_interval)?,
            burst_window: env.secs("BURST_WINDOW_SECS", d.burst_window)?,
            burst_threshold: env.parse("BURST_THRESHOLD", d.burst_threshold)?,
            max_context_lines: env.parse("MAX_CONTEXT_LINES", d.max_context_lines)?,
            min_message_chars: env.parse("MIN_MESSAGE_CHARS", d.min_message_chars)?,
            dedup_capacity: env.parse("DEDUP_CAPACITY", d.dedup_capacity)?,
            cache_ttl: env.secs("CACHE_TTL_SECS", d.cache_ttl)?,
            cache_capacity: env.parse("CACHE_CAPACITY", d.cache_capacity)?,
            rate_limit_capacity: env.parse("RATE_LIMIT_CAPACITY", d.rate_limit_capacity)?,
            rate_limit_window: env.secs("RATE_LIMIT_WINDOW_SECS", d.rate_limit_window)?,
            circuit_failure_threshold: env
                .parse("CIRCUIT_FAILURE_THRESHOLD", d.circuit_failure_threshold)?,
            circuit_reset_timeout: env.secs("CIRCUIT_RESET_SECS", d.circuit_reset_timeout)?,
            api_call_timeout: env.secs("API_TIMEOUT_SECS", d.api_call_timeout)?,
            persona_name: env.get("PERSONA").unwrap_or(d.persona_name),
            language_hint: env.parse("LANGUAGE", d.language_hint)?,
            tone: env.parse("TONE", d.tone)?,
            max_reply_words: env.parse("MAX_REPLY_WORDS", d.max_reply_words)?,
            temperature: env.parse("TEMPERATURE", d.temperature)?,
            model: env.get("MODEL").unwrap_or(d.model),
            fallback_pool,
            fallback_mode: env.flag("FALLBACK_MODE", d.fallback_mode)?,
            delivery_attempts: env.parse("DELIVERY_ATTEMPTS", d.delivery_attempts)?,
            delivery_retry_pause: match env.get("DELIVERY_RETRY_PAUSE_MS") {
                Some(raw) => Duration::from_millis(parse_value("DELIVERY_RETRY_PAUSE_MS", &raw)?),
                None => d.delivery_retry_pause,
            },
            chat_region: env.parse("CHAT_REGION", d.chat_region)?,
            message_box: env.parse("MESSAGE_BOX", d.message_box)?,
            reply_to_existing_on_start: env
                .flag("REPLY_TO_EXISTING", d.reply_to_existing_on_start)?,
        })
    }

    /// Check cross-field invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &str, message: &str) -> ConfigError {
            ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                message: message.to_string(),
            }
        }

        if self.check_interval.is_zero() {
            return Err(invalid("CHECK_INTERVAL_SECS", "must be greater than zero"));
        }
        if self.max_context_lines == 0 {
            return Err(invalid("MAX_CONTEXT_LINES", "must be at least 1"));
        }
        if self.dedup_capacity == 0 {
            return Err(invalid("DEDUP_CAPACITY", "must be at least 1"));
        }
        if self.cache_capacity == 0 {
            return Err(invalid("CACHE_CAPACITY", "must be at least 1"));
        }
        if self.rate_limit_capacity == 0 {
            return Err(invalid("RATE_LIMIT_CAPACITY", "must be at least 1"));
        }
        if self.rate_limit_window.is_zero() {
            return Err(invalid("RATE_LIMIT_WINDOW_SECS", "must be greater than zero"));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(invalid("CIRCUIT_FAILURE_THRESHOLD", "must be at least 1"));
        }
        if self.api_call_timeout < MIN_API_TIMEOUT || self.api_call_timeout > MAX_API_TIMEOUT {
            return Err(invalid("API_TIMEOUT_SECS", "must be between 1 and 60 seconds"));
        }
        if self.persona_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: format!("{ENV_PREFIX}PERSONA"),
                hint: "The persona name is used to recognise our own messages.".to_string(),
            });
        }
        if self.fallback_pool.is_empty() {
            return Err(invalid("FALLBACK_RESPONSES", "must contain at least one reply"));
        }
        if self.delivery_attempts == 0 {
            return Err(invalid("DELIVERY_ATTEMPTS", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("TEMPERATURE", "must be between 0.0 and 2.0"));
        }
        Ok(())
    }
}

impl ConfigSource for BotConfig {
    fn check_interval(&self) -> Duration {
        self.check_interval
    }
    fn debounce(&self) -> Duration {
        self.debounce
    }
    fn min_response_interval(&self) -> Duration {
        self.min_response_interval
    }
    fn burst_window(&self) -> Duration {
        self.burst_window
    }
    fn burst_threshold(&self) -> usize {
        self.burst_threshold
    }
    fn max_context_lines(&self) -> usize {
        self.max_context_lines
    }
    fn min_message_chars(&self) -> usize {
        self.min_message_chars
    }
    fn dedup_capacity(&self) -> usize {
        self.dedup_capacity
    }
    fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
    fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }
    fn rate_limit_capacity(&self) -> usize {
        self.rate_limit_capacity
    }
    fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }
    fn circuit_failure_threshold(&self) -> u32 {
        self.circuit_failure_threshold
    }
    fn circuit_reset_timeout(&self) -> Duration {
        self.circuit_reset_timeout
    }
    fn api_call_timeout(&self) -> Duration {
        self.api_call_timeout
    }
    fn persona_name(&self) -> &str {
        &self.persona_name
    }
    fn language_hint(&self) -> LanguageHint {
        self.language_hint
    }
    fn tone(&self) -> Tone {
        self.tone
    }
    fn max_reply_words(&self) -> usize {
        self.max_reply_words
    }
    fn temperature(&self) -> f32 {
        self.temperature
    }
    fn model(&self) -> &str {
        &self.model
    }
    fn fallback_pool(&self) -> &[String] {
        &self.fallback_pool
    }
    fn fallback_mode(&self) -> bool {
        self.fallback_mode
    }
    fn delivery_attempts(&self) -> u32 {
        self.delivery_attempts
    }
    fn delivery_retry_pause(&self) -> Duration {
        self.delivery_retry_pause
    }
    fn chat_region(&self) -> RegionBounds {
        self.chat_region
    }
    fn message_box(&self) -> &DeliveryTarget {
        &self.message_box
    }
    fn reply_to_existing_on_start(&self) -> bool {
        self.reply_to_existing_on_start
    }
}

/// Prefixed, typed access to a key/value lookup.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        let secs: f64 = parse_value(key, &raw)?;
        Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{key}"),
            message: format!("must be a non-negative number of seconds: {e}"),
        })
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                message: format!("expected a boolean, got '{other}'"),
            }),
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{key}"),
        message: format!("{e}"),
    })
}
