//! Per-provider health tracking.
//!
//! Every provider gets one [`ProviderHealth`] record, created lazily on first
//! use and kept for the process lifetime. Records sit behind their own mutex
//! so that updates for one provider never wait on another; the record also
//! owns the provider's [`CircuitBreaker`], which makes the health tracker the
//! single writer of circuit state.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;

use super::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, Transition,
};
use super::descriptor_store::ProviderStore;
use crate::clock::SharedClock;
use crate::models::ProviderId;

/// Weight of the newest sample in the response-time EMA.
const EMA_ALPHA: f64 = 0.2;

/// Mutable state for one provider.
#[derive(Debug)]
pub struct ProviderHealth {
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    average_response_ms: Option<f64>,
    total_requests: u64,
    total_successes: u64,
    circuit: CircuitBreaker,
}

impl ProviderHealth {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_success_at: None,
            last_failure_at: None,
            last_error: None,
            average_response_ms: None,
            total_requests: 0,
            total_successes: 0,
            circuit: CircuitBreaker::new(config),
        }
    }

    fn observe_latency(&mut self, sample_ms: f64) {
        self.average_response_ms = Some(match self.average_response_ms {
            None => sample_ms,
            Some(avg) => (1.0 - EMA_ALPHA) * avg + EMA_ALPHA * sample_ms,
        });
    }

    fn snapshot(&self, provider_id: &ProviderId, now: Instant) -> HealthSnapshot {
        HealthSnapshot {
            provider_id: provider_id.clone(),
            circuit_state: self.circuit.effective_state(now),
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
            last_error: self.last_error.clone(),
            average_response_ms: self.average_response_ms,
            total_requests: self.total_requests,
            total_successes: self.total_successes,
            cooldown_remaining_secs: self.circuit.cooldown_remaining(now).as_secs(),
        }
    }
}

/// Point-in-time copy of a provider's health.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub provider_id: ProviderId,
    /// Effective state: an open circuit whose cooldown has elapsed reads as
    /// `HalfOpen`.
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// `None` until the first successful sample.
    pub average_response_ms: Option<f64>,
    pub total_requests: u64,
    pub total_successes: u64,
    pub cooldown_remaining_secs: u64,
}

impl HealthSnapshot {
    /// Whether the circuit currently rejects calls outright.
    pub fn is_open(&self) -> bool {
        self.circuit_state == CircuitState::Open
    }
}

/// Answer of [`HealthTracker::should_use`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UseDecision {
    pub allowed: bool,
    pub reason: String,
    /// Set when this caller holds the single half-open trial.
    pub trial: bool,
    pub retry_after: Option<Duration>,
}

/// Tracks success/failure history, latency and circuit state per provider.
pub struct HealthTracker {
    store: Arc<ProviderStore>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    entries: DashMap<ProviderId, Arc<Mutex<ProviderHealth>>>,
}

impl HealthTracker {
    pub fn new(store: Arc<ProviderStore>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn existing(&self, provider_id: &str) -> Option<Arc<Mutex<ProviderHealth>>> {
        self.entries.get(provider_id).map(|entry| entry.clone())
    }

    fn entry(&self, provider_id: &str) -> Arc<Mutex<ProviderHealth>> {
        if let Some(existing) = self.existing(provider_id) {
            return existing;
        }
        self.entries
            .entry(ProviderId::from(provider_id))
            .or_insert_with(|| Arc::new(Mutex::new(ProviderHealth::new(&self.config))))
            .clone()
    }

    /// Lock a provider record, recovering from poison if necessary.
    ///
    /// The worst case of a poisoned record is slightly wrong counters, which
    /// is better than taking the whole orchestrator down.
    fn lock<'a>(entry: &'a Mutex<ProviderHealth>, provider_id: &str) -> MutexGuard<'a, ProviderHealth> {
        entry.lock().unwrap_or_else(|poisoned| {
            warn!("Health record for '{}' was poisoned, recovering", provider_id);
            poisoned.into_inner()
        })
    }

    fn threshold_for(&self, provider_id: &str) -> u32 {
        self.store
            .get(provider_id)
            .and_then(|d| d.failure_threshold)
            .unwrap_or(self.config.failure_threshold)
    }

    /// Record a successful call and its latency.
    pub fn record_success(&self, provider_id: &str, response_time_ms: u64) {
        let entry = self.entry(provider_id);
        let mut health = Self::lock(&entry, provider_id);

        health.consecutive_failures = 0;
        health.consecutive_successes += 1;
        health.total_requests += 1;
        health.total_successes += 1;
        health.last_success_at = Some(self.clock.wall());
        health.observe_latency(response_time_ms as f64);

        if let Some(transition) = health.circuit.on_success(&self.config) {
            log_transition(provider_id, transition);
        }

        debug!(
            "Health: success for '{}' in {}ms (avg {:.1}ms)",
            provider_id,
            response_time_ms,
            health.average_response_ms.unwrap_or_default()
        );
    }

    /// Record a failed call. Opens the circuit once the provider's threshold
    /// of consecutive failures is reached.
    pub fn record_failure(&self, provider_id: &str, error: &str) {
        let threshold = self.threshold_for(provider_id);
        let now = self.clock.now();
        let entry = self.entry(provider_id);
        let mut health = Self::lock(&entry, provider_id);

        health.consecutive_failures += 1;
        health.consecutive_successes = 0;
        health.total_requests += 1;
        health.last_failure_at = Some(self.clock.wall());
        health.last_error = Some(error.to_string());

        let failures = health.consecutive_failures;
        match health.circuit.on_failure(failures, threshold, now, &self.config) {
            Some(transition) => log_transition(provider_id, transition),
            None => debug!(
                "Health: failure for '{}' ({}/{}): {}",
                provider_id, failures, threshold, error
            ),
        }
    }

    /// Whether the provider may be called now.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and the
    /// caller receives the single trial slot.
    pub fn should_use(&self, provider_id: &str) -> UseDecision {
        let now = self.clock.now();
        let entry = self.entry(provider_id);
        let mut health = Self::lock(&entry, provider_id);

        let (admission, transition) = health.circuit.admit(now, &self.config);
        if let Some(transition) = transition {
            log_transition(provider_id, transition);
        }

        match admission {
            Admission::Allowed => UseDecision {
                allowed: true,
                reason: "circuit closed".to_string(),
                trial: false,
                retry_after: None,
            },
            Admission::Trial => UseDecision {
                allowed: true,
                reason: "half-open trial".to_string(),
                trial: true,
                retry_after: None,
            },
            Admission::Rejected {
                retry_after,
                trial_in_flight,
            } => UseDecision {
                allowed: false,
                reason: if trial_in_flight {
                    "half-open trial in flight".to_string()
                } else {
                    format!("circuit open, retry in {}s", retry_after.as_secs().max(1))
                },
                trial: false,
                retry_after: Some(retry_after),
            },
        }
    }

    /// Effective circuit state without side effects.
    pub fn circuit_state(&self, provider_id: &str) -> CircuitState {
        match self.existing(provider_id) {
            Some(entry) => {
                let health = Self::lock(&entry, provider_id);
                health.circuit.effective_state(self.clock.now())
            }
            None => CircuitState::Closed,
        }
    }

    /// Snapshot for one provider. Providers never seen yet report a fresh
    /// record.
    pub fn snapshot(&self, provider_id: &str) -> HealthSnapshot {
        let now = self.clock.now();
        let id = ProviderId::from(provider_id);
        match self.existing(provider_id) {
            Some(entry) => {
                let health = Self::lock(&entry, provider_id);
                health.snapshot(&id, now)
            }
            None => ProviderHealth::new(&self.config).snapshot(&id, now),
        }
    }

    /// Force a provider's circuit closed and clear its failure streak.
    pub fn reset(&self, provider_id: &str) {
        let entry = self.entry(provider_id);
        let mut health = Self::lock(&entry, provider_id);
        health.consecutive_failures = 0;
        health.circuit.reset(&self.config);
        info!("Circuit breaker: manually reset circuit for '{}'", provider_id);
    }
}

fn log_transition(provider_id: &str, transition: Transition) {
    match transition {
        Transition::Opened { cooldown } => info!(
            "Circuit breaker: opening circuit for '{}' for {}s",
            provider_id,
            cooldown.as_secs()
        ),
        Transition::HalfOpened => info!(
            "Circuit breaker: transitioning '{}' from OPEN to HALF_OPEN",
            provider_id
        ),
        Transition::Closed => info!(
            "Circuit breaker: closing circuit for '{}' after successful trial",
            provider_id
        ),
        Transition::Reopened { cooldown } => info!(
            "Circuit breaker: reopening circuit for '{}' for {}s after failed trial",
            provider_id,
            cooldown.as_secs()
        ),
    }
}
