/// How the orchestrator accounts for a failed attempt.
///
/// Every class moves on to the next candidate; they differ in which
/// per-provider state absorbs the failure.
///
/// | Class | Try Next Candidate? | Health / Circuit Penalty? | Rate Limiter Backoff? |
/// |-------|---------------------|---------------------------|-----------------------|
/// | `Backoff` | Yes | No | Yes |
/// | `FailoverWithPenalty` | Yes | Yes | No |
/// | `NextProvider` | Yes | No | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// The provider told us to slow down (HTTP 429).
    ///
    /// The rate limiter escalates its backoff for this provider and may
    /// blacklist it. The circuit breaker is left alone so a throttled
    /// provider is not penalised twice.
    Backoff,

    /// Failover to the next candidate and record a health failure.
    ///
    /// Used for network errors, timeouts, non-2xx responses and malformed
    /// payloads. Enough of these in a row open the provider's circuit.
    FailoverWithPenalty,

    /// Try the next candidate without recording anything against the provider.
    ///
    /// Used when the failure is local (missing plugin, missing API key)
    /// rather than a sign of upstream trouble.
    NextProvider,
}
