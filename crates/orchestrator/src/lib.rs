//! Coinpulse Orchestrator Crate
//!
//! Decides, for every logical data request ("BTC price", "Fear & Greed
//! index"), which upstream provider to call, in what order and under which
//! backoff policy, falling back automatically when a provider fails, is rate
//! limited or is geo-blocked.
//!
//! # Architecture
//!
//! ```text
//! +----------------------+
//! |     Orchestrator     |  fetch(category, key)
//! +----------------------+
//!            |
//!            v
//! +----------------------+     +----------------------+
//! |     PoolManager      | --> |   RotationStrategy   |  ranked candidates
//! +----------------------+     +----------------------+
//!            |
//!            v   for each candidate, in order
//! +----------------------+     +----------------------+
//! |     RateLimiter      |     |    HealthTracker     |  (circuit breaker)
//! +----------------------+     +----------------------+
//!            |
//!            v
//! +----------------------+
//! |     DataProvider     |  call + normalize
//! +----------------------+
//!            |
//!            v
//! +----------------------+
//! |    ResponseCache     |  last known good value
//! +----------------------+
//! ```
//!
//! # Core Types
//!
//! - [`Orchestrator`] - Entry point; built from an [`OrchestratorConfig`]
//! - [`ProviderDescriptor`] - Static provider metadata
//! - [`DataProvider`] - Plugin interface implemented once per upstream API
//! - [`FetchOutcome`] / [`FetchError`] - Result of an orchestrated fetch
//! - [`AttemptRecord`] - Per-candidate diagnostics carried on every result

pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod routing;

pub use cache::{CacheKey, CacheMode};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{OrchestratorConfig, PoolConfig};
pub use errors::{ConfigError, FetchError, PoolError, ProviderError, RetryClass};
pub use models::{
    Category, FetchOutcome, FetchResponse, FetchSource, ProviderDescriptor, ProviderId,
    ProviderQuery, QueryKey, RateLimitSpec, RawResponse,
};
pub use provider::{DataProvider, HttpJsonProvider};
pub use registry::{AttemptOutcome, AttemptRecord, CircuitState};
pub use routing::{
    FetchRequest, Orchestrator, OrchestratorBuilder, ProviderStatus, RotationStrategy,
};
