//! Per-provider circuit breaker state machine.
//!
//! The circuit has three states:
//!
//! - **Closed**: normal operation, every request is allowed.
//! - **Open**: the provider crossed its failure threshold; requests are
//!   rejected until the cooldown elapses.
//! - **HalfOpen**: the cooldown elapsed; exactly one trial request is let
//!   through. Its success closes the circuit, its failure reopens it with a
//!   doubled cooldown (capped at `max_cooldown`).
//!
//! A [`CircuitBreaker`] holds no lock and reads no clock of its own. It lives
//! inside the health record of one provider and is driven by the
//! [`HealthTracker`](super::HealthTracker), which serializes access per
//! provider and supplies `now`.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default number of consecutive failures before opening the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Cooldown applied the first time a circuit opens.
pub const DEFAULT_BASE_COOLDOWN: Duration = Duration::from_secs(30);

/// Upper bound for the doubling cooldown.
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening, unless a provider overrides it.
    pub failure_threshold: u32,
    /// First cooldown after opening. Also bounds how long a trial may stay
    /// unreported before another trial is granted.
    pub base_cooldown: Duration,
    /// Cap for the doubling cooldown.
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            base_cooldown: DEFAULT_BASE_COOLDOWN,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
        }
    }
}

/// Result of asking the circuit whether a call may proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed.
    Allowed,
    /// This caller holds the single half-open trial.
    Trial,
    /// Circuit open, or a trial is already in flight.
    Rejected {
        retry_after: Duration,
        trial_in_flight: bool,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// State change caused by an admission or a reported result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Opened { cooldown: Duration },
    HalfOpened,
    Closed,
    Reopened { cooldown: Duration },
}

/// Circuit for a single provider.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trial_started_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            cooldown: config.base_cooldown,
            trial_started_at: None,
        }
    }

    /// Stored state. An open circuit whose cooldown elapsed still reads
    /// `Open` here until the next admission moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// State as the next admission would see it.
    pub fn effective_state(&self, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open if self.cooldown_remaining(now).is_zero() => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Cooldown that applies to the current (or next) open period.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Time left before an open circuit may be probed.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                (opened_at + self.cooldown).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        }
    }

    /// Decide whether a call may proceed, moving Open -> HalfOpen when the
    /// cooldown has elapsed.
    pub fn admit(
        &mut self,
        now: Instant,
        config: &CircuitBreakerConfig,
    ) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => {
                let remaining = self.cooldown_remaining(now);
                if !remaining.is_zero() {
                    return (
                        Admission::Rejected {
                            retry_after: remaining,
                            trial_in_flight: false,
                        },
                        None,
                    );
                }
                self.state = CircuitState::HalfOpen;
                self.trial_started_at = Some(now);
                (Admission::Trial, Some(Transition::HalfOpened))
            }
            CircuitState::HalfOpen => match self.trial_started_at {
                Some(started) if now.saturating_duration_since(started) < config.base_cooldown => (
                    Admission::Rejected {
                        retry_after: (started + config.base_cooldown)
                            .saturating_duration_since(now),
                        trial_in_flight: true,
                    },
                    None,
                ),
                // No trial outstanding, or the previous one never reported.
                _ => {
                    self.trial_started_at = Some(now);
                    (Admission::Trial, None)
                }
            },
        }
    }

    /// Report a successful call. Closes a half-open circuit.
    pub fn on_success(&mut self, config: &CircuitBreakerConfig) -> Option<Transition> {
        match self.state {
            CircuitState::HalfOpen => {
                self.close(config);
                Some(Transition::Closed)
            }
            // A success that started before the circuit opened does not
            // close it; only the trial may.
            CircuitState::Closed | CircuitState::Open => None,
        }
    }

    /// Report a failed call.
    ///
    /// `consecutive_failures` already includes this failure.
    pub fn on_failure(
        &mut self,
        consecutive_failures: u32,
        threshold: u32,
        now: Instant,
        config: &CircuitBreakerConfig,
    ) -> Option<Transition> {
        match self.state {
            CircuitState::Closed if consecutive_failures >= threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                self.cooldown = config.base_cooldown;
                Some(Transition::Opened {
                    cooldown: self.cooldown,
                })
            }
            CircuitState::Closed => None,
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                self.trial_started_at = None;
                self.cooldown = self.cooldown.saturating_mul(2).min(config.max_cooldown);
                Some(Transition::Reopened {
                    cooldown: self.cooldown,
                })
            }
            CircuitState::Open => None,
        }
    }

    /// Force the circuit closed.
    pub fn reset(&mut self, config: &CircuitBreakerConfig) {
        self.close(config);
    }

    fn close(&mut self, config: &CircuitBreakerConfig) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trial_started_at = None;
        self.cooldown = config.base_cooldown;
    }
}
