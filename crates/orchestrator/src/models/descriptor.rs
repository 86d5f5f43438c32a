use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::category::Category;
use super::types::ProviderId;

const DEFAULT_PRIORITY: i32 = 10;
const DEFAULT_WEIGHT: u32 = 1;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_REQUESTS: u32 = 60;
const DEFAULT_WINDOW_SECONDS: u64 = 60;

/// Request budget a provider grants us.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Maximum requests inside one window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Minimum spacing between two consecutive requests.
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl RateLimitSpec {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
            min_interval_ms: 0,
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECONDS)
    }
}

/// Static metadata for one upstream provider.
///
/// Loaded once at startup and never mutated afterwards; the mutable
/// per-provider state lives in the health tracker and rate limiter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,

    pub category: Category,

    pub base_url: String,

    #[serde(default)]
    pub auth_required: bool,

    /// Lower values are tried first.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Relative share for weighted-random pools.
    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub rate_limit: RateLimitSpec,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Overrides the global circuit breaker failure threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Header carrying the API key. Defaults to `X-API-Key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,

    /// Path appended to `base_url`; `{key}` is replaced by the query key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// JSON pointer selecting the canonical object inside the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_pointer: Option<String>,
}

impl ProviderDescriptor {
    pub fn new(id: &str, category: Category, base_url: impl Into<String>) -> Self {
        Self {
            id: ProviderId::from(id),
            category,
            base_url: base_url.into(),
            auth_required: false,
            priority: DEFAULT_PRIORITY,
            weight: DEFAULT_WEIGHT,
            rate_limit: RateLimitSpec::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            failure_threshold: None,
            api_key_env: None,
            api_key_header: None,
            path: None,
            json_pointer: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitSpec) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_json_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.json_pointer = Some(pointer.into());
        self
    }

    pub fn with_api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.auth_required = true;
        self.api_key_env = Some(env_var.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_seconds() -> u64 {
    DEFAULT_WINDOW_SECONDS
}
