//! Per-provider request budgeting with adaptive 429 backoff.
//!
//! Three independent gates are applied on every [`RateLimiter::check`]:
//!
//! 1. **Backoff / blacklist**: after an upstream 429 the provider waits out
//!    an escalating backoff; once enough consecutive 429s pile up it is
//!    blacklisted and skipped entirely until the blacklist expires.
//! 2. **Window**: a sliding log of request timestamps guarantees that no
//!    rolling `window_seconds` ever contains more than `max_requests`
//!    allowed calls.
//! 3. **Minimum spacing**: consecutive requests are at least
//!    `min_interval_ms` apart, which prevents a burst right after the window
//!    frees up.
//!
//! An allowed check consumes budget immediately so that concurrent callers
//! can never overshoot the window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;

use super::descriptor_store::ProviderStore;
use crate::clock::SharedClock;
use crate::models::{ProviderId, RateLimitSpec};

/// Default escalation: 2 minutes, 4 minutes, 10 minutes.
pub const DEFAULT_BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(120),
    Duration::from_secs(240),
    Duration::from_secs(600),
];

/// Consecutive 429s that trigger the blacklist.
pub const DEFAULT_BLACKLIST_AFTER: u32 = 3;

/// Blacklist length when first entered (the second schedule tier).
pub const DEFAULT_BLACKLIST_DURATION: Duration = Duration::from_secs(240);

/// Adaptive backoff configuration.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Backoff for the 1st, 2nd, ... consecutive 429. The last tier also
    /// applies to every 429 past the blacklist threshold.
    pub schedule: Vec<Duration>,
    pub blacklist_after: u32,
    pub blacklist_duration: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_BACKOFF_SCHEDULE.to_vec(),
            blacklist_after: DEFAULT_BLACKLIST_AFTER,
            blacklist_duration: DEFAULT_BLACKLIST_DURATION,
        }
    }
}

impl BackoffConfig {
    /// Wait imposed after the `level`-th consecutive 429, and whether it is a
    /// blacklist.
    pub fn penalty(&self, level: u32) -> (Duration, bool) {
        let last = self.schedule.last().copied().unwrap_or(self.blacklist_duration);
        if level < self.blacklist_after {
            let tier = self
                .schedule
                .get(level.saturating_sub(1) as usize)
                .copied()
                .unwrap_or(last);
            (tier, false)
        } else if level == self.blacklist_after {
            (self.blacklist_duration, true)
        } else {
            (last.max(self.blacklist_duration), true)
        }
    }
}

/// Why a check was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    WindowExhausted,
    MinInterval,
    BackingOff,
    Blacklisted,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WindowExhausted => write!(f, "rate window exhausted"),
            Self::MinInterval => write!(f, "minimum request spacing"),
            Self::BackingOff => write!(f, "backing off after 429"),
            Self::Blacklisted => write!(f, "blacklisted after repeated 429"),
        }
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied {
        reason: DenyReason,
        retry_after: Duration,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::Denied { retry_after, .. } => Some(*retry_after),
        }
    }
}

/// Read-only view of one provider's limiter state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    /// Calls still allowed in the current rolling window.
    pub remaining: u32,
    /// Consecutive 429s since the last success.
    pub backoff_level: u32,
    pub backoff_remaining_secs: Option<u64>,
    pub blacklisted: bool,
}

#[derive(Debug)]
struct ProviderWindow {
    spec: RateLimitSpec,
    sent: VecDeque<Instant>,
    last_request: Option<Instant>,
    consecutive_rate_limits: u32,
    backoff_until: Option<Instant>,
    blacklisted: bool,
}

impl ProviderWindow {
    fn new(spec: RateLimitSpec) -> Self {
        Self {
            spec,
            sent: VecDeque::new(),
            last_request: None,
            consecutive_rate_limits: 0,
            backoff_until: None,
            blacklisted: false,
        }
    }

    fn prune(&mut self, now: Instant) {
        let window = self.spec.window();
        while let Some(&oldest) = self.sent.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }

    fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .map(|until| until.saturating_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    fn remaining(&self) -> u32 {
        self.spec
            .max_requests
            .saturating_sub(self.sent.len().min(u32::MAX as usize) as u32)
    }

    fn check(&mut self, now: Instant) -> RateDecision {
        if let Some(remaining) = self.backoff_remaining(now) {
            let reason = if self.blacklisted {
                DenyReason::Blacklisted
            } else {
                DenyReason::BackingOff
            };
            return RateDecision::Denied {
                reason,
                retry_after: remaining,
            };
        }

        self.prune(now);
        if self.sent.len() >= self.spec.max_requests as usize {
            let retry_after = self
                .sent
                .front()
                .map(|&oldest| (oldest + self.spec.window()).saturating_duration_since(now))
                .unwrap_or_default();
            return RateDecision::Denied {
                reason: DenyReason::WindowExhausted,
                retry_after,
            };
        }

        if let Some(last) = self.last_request {
            let next = last + self.spec.min_interval();
            if next > now {
                return RateDecision::Denied {
                    reason: DenyReason::MinInterval,
                    retry_after: next - now,
                };
            }
        }

        self.sent.push_back(now);
        self.last_request = Some(now);
        RateDecision::Allowed
    }
}

/// Per-provider rate limiter.
///
/// State is created lazily per provider from its descriptor's
/// [`RateLimitSpec`]; providers unknown to the store get the default spec.
pub struct RateLimiter {
    store: Arc<ProviderStore>,
    config: BackoffConfig,
    clock: SharedClock,
    windows: DashMap<ProviderId, Arc<Mutex<ProviderWindow>>>,
}

impl RateLimiter {
    pub fn new(store: Arc<ProviderStore>, config: BackoffConfig, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
            windows: DashMap::new(),
        }
    }

    fn existing(&self, provider_id: &str) -> Option<Arc<Mutex<ProviderWindow>>> {
        self.windows.get(provider_id).map(|w| w.clone())
    }

    fn window(&self, provider_id: &str) -> Arc<Mutex<ProviderWindow>> {
        if let Some(existing) = self.existing(provider_id) {
            return existing;
        }
        let spec = self
            .store
            .get(provider_id)
            .map(|d| d.rate_limit.clone())
            .unwrap_or_default();
        self.windows
            .entry(ProviderId::from(provider_id))
            .or_insert_with(|| Arc::new(Mutex::new(ProviderWindow::new(spec))))
            .clone()
    }

    /// Lock a provider window, recovering from poison if necessary.
    fn lock<'a>(window: &'a Mutex<ProviderWindow>, provider_id: &str) -> MutexGuard<'a, ProviderWindow> {
        window.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter window for '{}' was poisoned, recovering", provider_id);
            poisoned.into_inner()
        })
    }

    /// Check and, if allowed, consume one request from the provider's budget.
    pub fn check(&self, provider_id: &str) -> RateDecision {
        let now = self.clock.now();
        let window = self.window(provider_id);
        let decision = Self::lock(&window, provider_id).check(now);

        if let RateDecision::Denied { reason, retry_after } = decision {
            debug!(
                "Rate limiter: denied '{}' ({}), retry in {}ms",
                provider_id,
                reason,
                retry_after.as_millis()
            );
        }
        decision
    }

    /// Record an upstream 429 and escalate the provider's backoff.
    ///
    /// `retry_after` is the upstream hint; the longer of it and the
    /// scheduled penalty wins.
    pub fn record_rate_limited(&self, provider_id: &str, retry_after: Option<Duration>) {
        let now = self.clock.now();
        let window = self.window(provider_id);
        let mut state = Self::lock(&window, provider_id);

        state.consecutive_rate_limits += 1;
        let level = state.consecutive_rate_limits;
        let (penalty, blacklist) = self.config.penalty(level);
        let wait = retry_after.map_or(penalty, |hint| hint.max(penalty));

        let until = now + wait;
        state.backoff_until = Some(state.backoff_until.map_or(until, |current| current.max(until)));
        state.blacklisted = state.blacklisted || blacklist;

        if blacklist {
            info!(
                "Rate limiter: blacklisting '{}' for {}s after {} consecutive 429s",
                provider_id,
                wait.as_secs(),
                level
            );
        } else {
            info!(
                "Rate limiter: backing off '{}' for {}s (level {})",
                provider_id,
                wait.as_secs(),
                level
            );
        }
    }

    /// A successful call ends any backoff streak.
    pub fn record_success(&self, provider_id: &str) {
        let Some(window) = self.existing(provider_id) else {
            return;
        };
        let mut state = Self::lock(&window, provider_id);
        if state.consecutive_rate_limits > 0 {
            debug!(
                "Rate limiter: clearing backoff level {} for '{}'",
                state.consecutive_rate_limits, provider_id
            );
        }
        state.consecutive_rate_limits = 0;
        state.backoff_until = None;
        state.blacklisted = false;
    }

    /// Drop backoff and blacklist state without touching the request log.
    pub fn clear_backoff(&self, provider_id: &str) {
        if let Some(window) = self.existing(provider_id) {
            let mut state = Self::lock(&window, provider_id);
            state.consecutive_rate_limits = 0;
            state.backoff_until = None;
            state.blacklisted = false;
            info!("Rate limiter: manually cleared backoff for '{}'", provider_id);
        }
    }

    pub fn is_blacklisted(&self, provider_id: &str) -> bool {
        let now = self.clock.now();
        match self.existing(provider_id) {
            Some(window) => {
                let state = Self::lock(&window, provider_id);
                state.blacklisted && state.backoff_remaining(now).is_some()
            }
            None => false,
        }
    }

    pub fn snapshot(&self, provider_id: &str) -> RateLimitSnapshot {
        let now = self.clock.now();
        let Some(window) = self.existing(provider_id) else {
            let max = self
                .store
                .get(provider_id)
                .map(|d| d.rate_limit.max_requests)
                .unwrap_or_else(|| RateLimitSpec::default().max_requests);
            return RateLimitSnapshot {
                remaining: max,
                backoff_level: 0,
                backoff_remaining_secs: None,
                blacklisted: false,
            };
        };

        let mut state = Self::lock(&window, provider_id);
        state.prune(now);
        let backoff = state.backoff_remaining(now);
        RateLimitSnapshot {
            remaining: state.remaining(),
            backoff_level: state.consecutive_rate_limits,
            backoff_remaining_secs: backoff.map(|d| d.as_secs()),
            blacklisted: state.blacklisted && backoff.is_some(),
        }
    }
}
