//! Per-request attempt tracking for fallback diagnostics.

use std::time::Duration;

use serde::Serialize;

use crate::models::ProviderId;

/// What happened when a candidate came up in the ranked sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    SkippedCircuitOpen,
    SkippedRateLimited,
}

impl AttemptOutcome {
    /// Whether this outcome involved a network call.
    pub const fn called_upstream(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Record of a single candidate during a fetch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub provider_id: ProviderId,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Error message for failures, skip reason for skips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered attempt list for one orchestrated request.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    attempts: Vec<AttemptRecord>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, outcome: AttemptOutcome, reason: String) {
        debug_assert!(!outcome.called_upstream());
        self.attempts.push(AttemptRecord {
            provider_id,
            outcome,
            response_time_ms: None,
            error: Some(reason),
        });
    }

    pub fn record_failure(
        &mut self,
        provider_id: ProviderId,
        elapsed: Option<Duration>,
        error: String,
    ) {
        self.attempts.push(AttemptRecord {
            provider_id,
            outcome: AttemptOutcome::Failure,
            response_time_ms: elapsed.map(duration_ms),
            error: Some(error),
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId, elapsed: Duration) {
        self.attempts.push(AttemptRecord {
            provider_id,
            outcome: AttemptOutcome::Success,
            response_time_ms: Some(duration_ms(elapsed)),
            error: None,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        summarize(&self.attempts)
    }

    /// Number of attempts that reached the network.
    pub fn upstream_calls(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome.called_upstream())
            .count()
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<AttemptRecord> {
        self.attempts
    }
}

/// Render attempts as `A: FAILURE (...) -> B: SUCCESS`.
pub fn summarize(attempts: &[AttemptRecord]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(|a| match (a.outcome, &a.error) {
            (AttemptOutcome::Success, _) => format!("{}: SUCCESS", a.provider_id),
            (AttemptOutcome::Failure, Some(err)) => format!("{}: FAILURE ({})", a.provider_id, err),
            (AttemptOutcome::Failure, None) => format!("{}: FAILURE", a.provider_id),
            (outcome, reason) => format!(
                "{}: SKIPPED {:?} ({})",
                a.provider_id,
                outcome,
                reason.as_deref().unwrap_or("-")
            ),
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_summary() {
        let mut diag = FetchDiagnostics::new();
        diag.record_skip(
            ProviderId::from("binance"),
            AttemptOutcome::SkippedCircuitOpen,
            "circuit open".to_string(),
        );
        diag.record_failure(
            ProviderId::from("coincap"),
            Some(Duration::from_millis(120)),
            "Timeout".to_string(),
        );
        diag.record_success(ProviderId::from("coingecko"), Duration::from_millis(80));

        let summary = diag.summary();
        assert!(summary.contains("binance: SKIPPED"));
        assert!(summary.contains("coincap: FAILURE (Timeout)"));
        assert!(summary.contains("coingecko: SUCCESS"));
    }

    #[test]
    fn test_upstream_calls_ignore_skips() {
        let mut diag = FetchDiagnostics::new();
        diag.record_skip(
            ProviderId::from("a"),
            AttemptOutcome::SkippedRateLimited,
            "window exhausted".to_string(),
        );
        assert_eq!(diag.upstream_calls(), 0);

        diag.record_success(ProviderId::from("b"), Duration::from_millis(5));
        assert_eq!(diag.upstream_calls(), 1);
    }

    #[test]
    fn test_attempt_record_serializes_outcome_in_snake_case() {
        let mut diag = FetchDiagnostics::new();
        diag.record_skip(
            ProviderId::from("a"),
            AttemptOutcome::SkippedRateLimited,
            "blacklisted".to_string(),
        );
        let json = serde_json::to_value(diag.attempts()).unwrap();
        assert_eq!(json[0]["outcome"], "skipped_rate_limited");
        assert!(json[0].get("response_time_ms").is_none());
    }
}
