//! Error types and retry classification for the orchestrator.
//!
//! This module provides:
//! - [`ProviderError`]: per-candidate failures returned by provider plugins
//! - [`RetryClass`]: how each failure is accounted for
//! - [`FetchError`]: the single terminal error surfaced by `fetch`
//! - [`ConfigError`] and [`PoolError`]: setup and runtime membership errors

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;

use crate::models::{Category, QueryKey};
use crate::registry::AttemptRecord;

/// Failure of a single provider attempt.
///
/// These never reach the caller of `fetch` directly; they are recorded on the
/// attempt list and classified via [`retry_class`](Self::retry_class).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("Network error: {provider} - {message}")]
    Network { provider: String, message: String },

    /// The attempt exceeded the provider's configured timeout.
    #[error("Timeout: {provider} after {}ms", after.as_millis())]
    Timeout { provider: String, after: Duration },

    /// Upstream answered HTTP 429.
    #[error("Rate limited: {provider}")]
    RateLimited {
        provider: String,
        /// Upstream `Retry-After` hint, when present.
        retry_after: Option<Duration>,
    },

    /// Non-2xx status other than 429 (5xx, 403/451 geo-blocks, ...).
    #[error("Unavailable: {provider} (HTTP {status})")]
    Unavailable { provider: String, status: u16 },

    /// 2xx response whose payload could not be normalized.
    #[error("Upstream data error: {provider} - {message}")]
    UpstreamData { provider: String, message: String },

    /// The provider cannot be called as configured (e.g. missing API key).
    #[error("Misconfigured: {provider} - {message}")]
    Misconfigured { provider: String, message: String },

    /// A descriptor exists but no plugin was registered for it.
    #[error("Provider not registered: {provider}")]
    NotRegistered { provider: String },
}

impl ProviderError {
    /// Returns the accounting class for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use coinpulse_orchestrator::errors::{ProviderError, RetryClass};
    ///
    /// let error = ProviderError::RateLimited { provider: "coingecko".to_string(), retry_after: None };
    /// assert_eq!(error.retry_class(), RetryClass::Backoff);
    ///
    /// let error = ProviderError::Unavailable { provider: "coincap".to_string(), status: 503 };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. } => RetryClass::Backoff,

            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Unavailable { .. }
            | Self::UpstreamData { .. } => RetryClass::FailoverWithPenalty,

            Self::Misconfigured { .. } | Self::NotRegistered { .. } => RetryClass::NextProvider,
        }
    }

    /// Stable machine-readable code used in logs and diagnostics.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "provider.network",
            Self::Timeout { .. } => "provider.timeout",
            Self::RateLimited { .. } => "provider.rate_limited",
            Self::Unavailable { .. } => "provider.unavailable",
            Self::UpstreamData { .. } => "provider.upstream_data",
            Self::Misconfigured { .. } => "provider.misconfigured",
            Self::NotRegistered { .. } => "provider.not_registered",
        }
    }
}

/// Terminal failure of an orchestrated fetch.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Every candidate was tried or skipped and nothing was cached for the key.
    #[error("No providers available for {category}/{query_key}")]
    NoProvidersAvailable {
        category: Category,
        query_key: QueryKey,
        attempts: Vec<AttemptRecord>,
    },
}

impl FetchError {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::NoProvidersAvailable { attempts, .. } => attempts,
        }
    }

    pub fn into_attempts(self) -> Vec<AttemptRecord> {
        match self {
            Self::NoProvidersAvailable { attempts, .. } => attempts,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown rotation strategy: {0}")]
    UnknownStrategy(String),
}

/// Runtime pool membership errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("No pool configured for category {0}")]
    UnknownPool(Category),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {provider} serves {actual}, not {expected}")]
    CategoryMismatch {
        provider: String,
        expected: Category,
        actual: Category,
    },

    #[error("Provider {provider} is already a member of the {category} pool")]
    DuplicateMember { provider: String, category: Category },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_backs_off() {
        let error = ProviderError::RateLimited {
            provider: "coingecko".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(error.retry_class(), RetryClass::Backoff);
    }

    #[test]
    fn test_transport_failures_are_penalised() {
        let errors = [
            ProviderError::Network {
                provider: "a".to_string(),
                message: "connection refused".to_string(),
            },
            ProviderError::Timeout {
                provider: "a".to_string(),
                after: Duration::from_secs(8),
            },
            ProviderError::Unavailable {
                provider: "a".to_string(),
                status: 451,
            },
            ProviderError::UpstreamData {
                provider: "a".to_string(),
                message: "expected object".to_string(),
            },
        ];
        for error in errors {
            assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty, "{error}");
        }
    }

    #[test]
    fn test_local_failures_skip_without_penalty() {
        let error = ProviderError::NotRegistered {
            provider: "ghost".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);

        let error = ProviderError::Misconfigured {
            provider: "cmc".to_string(),
            message: "CMC_API_KEY is not set".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);
    }

    #[test]
    fn test_error_display() {
        let error = ProviderError::Timeout {
            provider: "coincap".to_string(),
            after: Duration::from_millis(8000),
        };
        assert_eq!(format!("{}", error), "Timeout: coincap after 8000ms");

        let error = ProviderError::Unavailable {
            provider: "binance".to_string(),
            status: 451,
        };
        assert_eq!(format!("{}", error), "Unavailable: binance (HTTP 451)");
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let error = ProviderError::RateLimited {
            provider: "a".to_string(),
            retry_after: None,
        };
        assert_eq!(error.code(), "provider.rate_limited");
    }
}
