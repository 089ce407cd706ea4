//! Error types for autoreply.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures reported by a generative provider.
///
/// Split into two families: transient conditions that say something about
/// provider capacity or availability (they feed the circuit breaker), and
/// non-retryable ones that would fail the same way on every attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} transient failure: {reason}")]
    Transient { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rejected the request: {reason}")]
    InvalidRequest { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ProviderError {
    /// Whether this failure is a capacity/availability signal that should
    /// count toward the circuit breaker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Transient { .. }
        )
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::AuthFailed { .. } => "auth_failed",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }
}

/// Errors raised by the UI-automation collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Failed to capture surface region: {0}")]
    CaptureFailed(String),

    #[error("Input injection failed: {0}")]
    InjectionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
