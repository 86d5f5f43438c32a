//! Fallback orchestrator: the single entry point for data requests.
//!
//! For each request the orchestrator asks the pool manager for a ranked
//! candidate sequence and walks it strictly in order. Every candidate gets at
//! most one upstream call; the first success wins and is cached. When the
//! sequence is exhausted the last known value is served (flagged stale), and
//! only when nothing was ever cached does the caller see
//! [`FetchError::NoProvidersAvailable`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pool::{PoolInfo, PoolManager};
use crate::cache::{CacheKey, CacheMode, ResponseCache};
use crate::clock::{SharedClock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::errors::{ConfigError, FetchError, PoolError, ProviderError, RetryClass};
use crate::models::{
    Category, FetchOutcome, FetchSource, ProviderId, ProviderQuery, QueryKey,
};
use crate::provider::DataProvider;
use crate::registry::{
    AttemptOutcome, AttemptRecord, CircuitState, FetchDiagnostics, HealthTracker, ProviderStore,
    RateDecision, RateLimiter,
};

/// One logical request.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub category: Category,
    pub query_key: QueryKey,
    /// Free-form caller identity, used in logs only.
    pub requester: Option<String>,
    pub cache_mode: CacheMode,
}

impl FetchRequest {
    pub fn new(category: Category, query_key: impl Into<QueryKey>) -> Self {
        Self {
            category,
            query_key: query_key.into(),
            requester: None,
            cache_mode: CacheMode::default(),
        }
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }
}

/// Per-provider row of the status export.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub category: Category,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub average_response_ms: Option<f64>,
    pub total_requests: u64,
    pub rate_limit_remaining: u32,
    pub backoff_level: u32,
    /// Seconds left on an active blacklist.
    pub blacklisted_for_secs: Option<u64>,
}

/// Builder wiring configuration, plugins and clock together.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    plugins: Vec<Arc<dyn DataProvider>>,
    clock: SharedClock,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            plugins: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Register the plugin serving the descriptor with the same id.
    pub fn with_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.plugins.push(provider);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        let Self {
            config,
            plugins,
            clock,
        } = self;
        config.validate()?;

        let store = Arc::new(ProviderStore::new(config.providers.clone())?);

        let mut registered: HashMap<ProviderId, Arc<dyn DataProvider>> = HashMap::new();
        for plugin in plugins {
            let descriptor = store.get(plugin.id()).ok_or_else(|| {
                ConfigError::Invalid(format!("plugin '{}' has no provider descriptor", plugin.id()))
            })?;
            if registered.insert(descriptor.id.clone(), plugin).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "more than one plugin registered for '{}'",
                    descriptor.id
                )));
            }
        }
        for id in store.ids() {
            if !registered.contains_key(id) {
                warn!(provider = %id, "no plugin registered; provider will be skipped");
            }
        }

        let health = Arc::new(HealthTracker::new(
            store.clone(),
            config.circuit.to_breaker_config(),
            clock.clone(),
        ));
        let limiter = RateLimiter::new(store.clone(), config.backoff.to_backoff_config(), clock.clone());
        let pools = PoolManager::new(store.clone(), health.clone(), &config.pools)?;
        let cache = ResponseCache::new(
            config.cache.default_ttl(),
            config.cache.ttl_overrides(),
            clock,
        );

        info!(
            providers = store.len(),
            plugins = registered.len(),
            pools = pools.pools().len(),
            "orchestrator ready"
        );

        Ok(Orchestrator {
            store,
            health,
            limiter,
            pools,
            cache,
            plugins: registered,
            max_candidates: config.max_candidates,
            coalesce: config.coalesce_requests,
            in_flight: DashMap::new(),
        })
    }
}

/// Multi-provider fetcher with health tracking, rate limiting, circuit
/// breaking and a last-known-good cache.
pub struct Orchestrator {
    store: Arc<ProviderStore>,
    health: Arc<HealthTracker>,
    limiter: RateLimiter,
    pools: PoolManager,
    cache: ResponseCache,
    plugins: HashMap<ProviderId, Arc<dyn DataProvider>>,
    max_candidates: usize,
    coalesce: bool,
    in_flight: DashMap<CacheKey, InFlight>,
}

/// Result slot of the walk currently running for one key.
type InFlight = watch::Receiver<Option<Result<FetchOutcome, FetchError>>>;

enum Role {
    Leader(watch::Sender<Option<Result<FetchOutcome, FetchError>>>),
    Waiter(InFlight),
}

/// Clears a key's in-flight slot when its walk finishes or is cancelled.
struct InFlightSlot<'a> {
    in_flight: &'a DashMap<CacheKey, InFlight>,
    key: &'a CacheKey,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(self.key);
    }
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Fetch with default cache behaviour.
    pub async fn fetch(&self, category: Category, query_key: &str) -> Result<FetchOutcome, FetchError> {
        self.fetch_with(FetchRequest::new(category, query_key)).await
    }

    pub async fn fetch_with(&self, request: FetchRequest) -> Result<FetchOutcome, FetchError> {
        let request_id = Uuid::new_v4();
        let key = CacheKey::new(request.category, request.query_key.clone());
        debug!(
            %request_id,
            key = %key,
            requester = request.requester.as_deref().unwrap_or("-"),
            mode = ?request.cache_mode,
            "fetch"
        );

        if request.cache_mode.reads_fresh() {
            if let Some(entry) = self.cache.get_fresh(&key) {
                debug!(%request_id, key = %key, "served fresh cache entry");
                return Ok(cached(request_id, entry.value, false, Vec::new()));
            }
        }

        if !self.coalesce || request.cache_mode == CacheMode::Bypass {
            return self.walk(request_id, &key, request.cache_mode).await;
        }

        // One walk per key at a time; callers arriving meanwhile share its
        // result, success or failure.
        let role = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => Role::Waiter(slot.get().clone()),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx);
                Role::Leader(tx)
            }
        };

        match role {
            Role::Leader(tx) => {
                let _slot = InFlightSlot {
                    in_flight: &self.in_flight,
                    key: &key,
                };
                let result = self.walk(request_id, &key, request.cache_mode).await;
                tx.send_replace(Some(result.clone()));
                result
            }
            Role::Waiter(mut rx) => {
                let leader = match rx.wait_for(Option::is_some).await {
                    Ok(shared) => (*shared).clone(),
                    Err(_) => None,
                };
                match leader {
                    Some(result) => {
                        debug!(%request_id, key = %key, ok = result.is_ok(), "joined in-flight fetch");
                        result.map(|outcome| cached(request_id, outcome.data, outcome.stale, Vec::new()))
                    }
                    None => {
                        debug!(%request_id, key = %key, "in-flight fetch dropped, walking");
                        self.walk(request_id, &key, request.cache_mode).await
                    }
                }
            }
        }
    }

    async fn walk(
        &self,
        request_id: Uuid,
        key: &CacheKey,
        mode: CacheMode,
    ) -> Result<FetchOutcome, FetchError> {
        let candidates = self.pools.ranked_candidates(key.category).unwrap_or_else(|e| {
            warn!(%request_id, key = %key, error = %e, "no pool for category");
            Vec::new()
        });
        let query = ProviderQuery::new(key.category, key.query_key.clone());
        let mut diagnostics = FetchDiagnostics::new();

        for provider_id in candidates.into_iter().take(self.max_candidates) {
            let (Some(plugin), Some(descriptor)) =
                (self.plugins.get(&provider_id), self.store.get(&provider_id))
            else {
                let err = ProviderError::NotRegistered {
                    provider: provider_id.to_string(),
                };
                diagnostics.record_failure(provider_id, None, err.to_string());
                continue;
            };

            // An open circuit is skipped before touching the rate budget.
            let health = self.health.snapshot(&provider_id);
            if health.is_open() {
                let reason = format!(
                    "circuit open, retry in {}s",
                    health.cooldown_remaining_secs.max(1)
                );
                debug!(%request_id, provider = %provider_id, %reason, "skipped");
                diagnostics.record_skip(provider_id, AttemptOutcome::SkippedCircuitOpen, reason);
                continue;
            }

            if let RateDecision::Denied { reason, retry_after } = self.limiter.check(&provider_id) {
                let reason = format!("{reason}, retry in {}s", retry_after.as_secs().max(1));
                debug!(%request_id, provider = %provider_id, %reason, "skipped");
                diagnostics.record_skip(provider_id, AttemptOutcome::SkippedRateLimited, reason);
                continue;
            }

            let decision = self.health.should_use(&provider_id);
            if !decision.allowed {
                debug!(%request_id, provider = %provider_id, reason = %decision.reason, "skipped");
                diagnostics.record_skip(
                    provider_id,
                    AttemptOutcome::SkippedCircuitOpen,
                    decision.reason,
                );
                continue;
            }

            let timeout = descriptor.timeout();
            let started = tokio::time::Instant::now();
            let result = match tokio::time::timeout(timeout, plugin.call(&query)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    provider: provider_id.to_string(),
                    after: timeout,
                }),
            };
            let elapsed = started.elapsed();

            match result.and_then(|raw| plugin.normalize(raw)) {
                Ok(data) => {
                    let elapsed_ms = elapsed.as_millis().min(u128::from(u64::MAX)) as u64;
                    self.health.record_success(&provider_id, elapsed_ms);
                    self.limiter.record_success(&provider_id);
                    let cache_version = mode
                        .writes()
                        .then(|| self.cache.put(key.clone(), data.clone(), provider_id.clone()).version);
                    diagnostics.record_success(provider_id.clone(), elapsed);

                    info!(
                        %request_id,
                        key = %key,
                        provider = %provider_id,
                        elapsed_ms,
                        trial = decision.trial,
                        upstream_calls = diagnostics.upstream_calls(),
                        cache_version = ?cache_version,
                        attempts = %diagnostics.summary(),
                        "fetched"
                    );
                    return Ok(FetchOutcome {
                        request_id,
                        data,
                        source: FetchSource::Provider(provider_id),
                        stale: false,
                        attempts: diagnostics.into_attempts(),
                    });
                }
                Err(err) => {
                    self.account_failure(request_id, key.category, &provider_id, &err);
                    diagnostics.record_failure(provider_id, Some(elapsed), err.to_string());
                }
            }
        }

        if mode.serves_stale() {
            if let Some(entry) = self.cache.get(key) {
                warn!(
                    %request_id,
                    key = %key,
                    from = %entry.provider_id,
                    fetched_at = %entry.fetched_at_wall,
                    attempts = %diagnostics.summary(),
                    "all providers failed, serving stale cache"
                );
                return Ok(cached(request_id, entry.value, true, diagnostics.into_attempts()));
            }
        }

        warn!(
            %request_id,
            key = %key,
            upstream_calls = diagnostics.upstream_calls(),
            attempts = %diagnostics.summary(),
            "no providers available"
        );
        Err(FetchError::NoProvidersAvailable {
            category: key.category,
            query_key: key.query_key.clone(),
            attempts: diagnostics.into_attempts(),
        })
    }

    fn account_failure(
        &self,
        request_id: Uuid,
        category: Category,
        provider_id: &str,
        err: &ProviderError,
    ) {
        match err.retry_class() {
            RetryClass::Backoff => {
                if let ProviderError::RateLimited { retry_after, .. } = err {
                    self.limiter.record_rate_limited(provider_id, *retry_after);
                }
                info!(%request_id, provider = provider_id, "rate limited upstream, backing off");
            }
            RetryClass::FailoverWithPenalty => {
                self.health.record_failure(provider_id, &err.to_string());
                if let Err(e) = self.pools.rotate_on_failure(category, provider_id) {
                    debug!(%request_id, provider = provider_id, error = %e, "rotation skipped");
                }
                warn!(%request_id, provider = provider_id, code = err.code(), error = %err, "provider failed");
            }
            RetryClass::NextProvider => {
                warn!(%request_id, provider = provider_id, code = err.code(), error = %err, "provider unusable, trying next");
            }
        }
    }

    /// Health and rate-limit figures for every configured provider.
    pub fn status(&self) -> BTreeMap<String, ProviderStatus> {
        self.store
            .iter()
            .map(|descriptor| {
                let health = self.health.snapshot(&descriptor.id);
                let rate = self.limiter.snapshot(&descriptor.id);
                let status = ProviderStatus {
                    category: descriptor.category,
                    circuit_state: health.circuit_state,
                    consecutive_failures: health.consecutive_failures,
                    average_response_ms: health.average_response_ms,
                    total_requests: health.total_requests,
                    rate_limit_remaining: rate.remaining,
                    backoff_level: rate.backoff_level,
                    blacklisted_for_secs: if rate.blacklisted {
                        rate.backoff_remaining_secs
                    } else {
                        None
                    },
                };
                (descriptor.id.to_string(), status)
            })
            .collect()
    }

    /// Close a provider's circuit.
    pub fn reset_circuit(&self, provider_id: &str) -> Result<(), PoolError> {
        self.ensure_known(provider_id)?;
        self.health.reset(provider_id);
        Ok(())
    }

    /// Lift a provider's 429 backoff or blacklist.
    pub fn clear_backoff(&self, provider_id: &str) -> Result<(), PoolError> {
        self.ensure_known(provider_id)?;
        self.limiter.clear_backoff(provider_id);
        Ok(())
    }

    pub fn add_pool_member(&self, category: Category, provider_id: &str) -> Result<(), PoolError> {
        self.pools.add_member(category, provider_id)
    }

    pub fn remove_pool_member(&self, category: Category, provider_id: &str) -> Result<bool, PoolError> {
        self.pools.remove_member(category, provider_id)
    }

    pub fn pools(&self) -> Vec<PoolInfo> {
        self.pools.pools()
    }

    /// Ranked candidates the next fetch for `category` would walk.
    pub fn ranked_candidates(&self, category: Category) -> Result<Vec<ProviderId>, PoolError> {
        self.pools.ranked_candidates(category)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn ensure_known(&self, provider_id: &str) -> Result<(), PoolError> {
        if self.store.contains(provider_id) {
            Ok(())
        } else {
            Err(PoolError::UnknownProvider(provider_id.to_string()))
        }
    }
}

fn cached(
    request_id: Uuid,
    data: Value,
    stale: bool,
    attempts: Vec<AttemptRecord>,
) -> FetchOutcome {
    FetchOutcome {
        request_id,
        data,
        source: FetchSource::Cache,
        stale,
        attempts,
    }
}
