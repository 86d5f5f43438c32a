//! Provider registry: descriptors and the mutable per-provider state.

mod attempts;
mod circuit_breaker;
mod descriptor_store;
mod health;
mod rate_limiter;

pub use attempts::{summarize, AttemptOutcome, AttemptRecord, FetchDiagnostics};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, Transition,
    DEFAULT_BASE_COOLDOWN, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_COOLDOWN,
};
pub use descriptor_store::ProviderStore;
pub use health::{HealthSnapshot, HealthTracker, ProviderHealth, UseDecision};
pub use rate_limiter::{
    BackoffConfig, DenyReason, RateDecision, RateLimitSnapshot, RateLimiter,
    DEFAULT_BACKOFF_SCHEDULE, DEFAULT_BLACKLIST_AFTER, DEFAULT_BLACKLIST_DURATION,
};
