//! Rotation strategies.
//!
//! Ranking is a pure function of the pool members, their health figures and
//! (for round-robin) the pool cursor, so every strategy can be tested
//! without a running orchestrator. The result is always the full candidate
//! sequence: providers with an open circuit are moved to the tail rather
//! than dropped, and the orchestrator walks the sequence in order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::ProviderId;

/// Closed set of rotation policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Ascending `priority`, ties by lowest average latency.
    #[default]
    Priority,
    /// Rotate through members using the pool cursor.
    RoundRobin,
    /// Sample without replacement proportionally to `weight`.
    WeightedRandom,
    /// Ascending `total_requests`.
    LeastUsed,
    /// Ascending average latency; unmeasured providers first.
    FastestResponse,
}

impl RotationStrategy {
    pub const ALL: [RotationStrategy; 5] = [
        RotationStrategy::Priority,
        RotationStrategy::RoundRobin,
        RotationStrategy::WeightedRandom,
        RotationStrategy::LeastUsed,
        RotationStrategy::FastestResponse,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::RoundRobin => "round_robin",
            Self::WeightedRandom => "weighted_random",
            Self::LeastUsed => "least_used",
            Self::FastestResponse => "fastest_response",
        }
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RotationStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        RotationStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownStrategy(s.to_string()))
    }
}

/// Everything a strategy may look at for one pool member.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub id: ProviderId,
    pub priority: i32,
    pub weight: u32,
    pub average_response_ms: Option<f64>,
    pub total_requests: u64,
    /// Circuit open with cooldown still running.
    pub circuit_open: bool,
}

/// Order `members` (given in pool order) according to `strategy`.
///
/// `cursor` is only read by round-robin. Open-circuit members are appended
/// after the primary ranking in ascending priority.
pub fn rank<R>(
    strategy: RotationStrategy,
    members: &[Candidate],
    cursor: usize,
    rng: &mut R,
) -> Vec<ProviderId>
where
    R: Rng + ?Sized,
{
    let rotated: Vec<&Candidate> = match strategy {
        RotationStrategy::RoundRobin if !members.is_empty() => {
            let start = cursor % members.len();
            members[start..].iter().chain(&members[..start]).collect()
        }
        _ => members.iter().collect(),
    };

    let (mut primary, mut open): (Vec<&Candidate>, Vec<&Candidate>) =
        rotated.into_iter().partition(|c| !c.circuit_open);

    match strategy {
        RotationStrategy::Priority => primary.sort_by(|a, b| by_priority(a, b)),
        RotationStrategy::RoundRobin => {}
        RotationStrategy::WeightedRandom => primary = weighted_shuffle(primary, rng),
        RotationStrategy::LeastUsed => primary.sort_by_key(|c| c.total_requests),
        RotationStrategy::FastestResponse => {
            primary.sort_by(|a, b| latency_key(a).total_cmp(&latency_key(b)))
        }
    }
    open.sort_by(|a, b| by_priority(a, b));

    primary
        .into_iter()
        .chain(open)
        .map(|c| c.id.clone())
        .collect()
}

fn latency_key(candidate: &Candidate) -> f64 {
    candidate.average_response_ms.unwrap_or(f64::NEG_INFINITY)
}

fn by_priority(a: &Candidate, b: &Candidate) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| latency_key(a).total_cmp(&latency_key(b)))
}

/// Weighted sampling without replacement. Zero-weight members keep their
/// relative order at the end.
fn weighted_shuffle<'a, R>(mut pool: Vec<&'a Candidate>, rng: &mut R) -> Vec<&'a Candidate>
where
    R: Rng + ?Sized,
{
    let mut ordered = Vec::with_capacity(pool.len());
    loop {
        let total: u64 = pool.iter().map(|c| u64::from(c.weight)).sum();
        if total == 0 {
            break;
        }
        let mut ticket = rng.gen_range(0..total);
        let mut picked = pool.len() - 1;
        for (idx, candidate) in pool.iter().enumerate() {
            let weight = u64::from(candidate.weight);
            if ticket < weight {
                picked = idx;
                break;
            }
            ticket -= weight;
        }
        ordered.push(pool.remove(picked));
    }
    ordered.extend(pool);
    ordered
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn candidate(id: &str, priority: i32) -> Candidate {
        Candidate {
            id: ProviderId::from(id),
            priority,
            weight: 1,
            average_response_ms: None,
            total_requests: 0,
            circuit_open: false,
        }
    }

    fn ids(ranked: &[ProviderId]) -> Vec<&str> {
        ranked.iter().map(|id| &**id).collect()
    }

    #[test]
    fn test_priority_orders_ascending_with_latency_tiebreak() {
        let mut fast = candidate("fast", 2);
        fast.average_response_ms = Some(80.0);
        let mut slow = candidate("slow", 2);
        slow.average_response_ms = Some(400.0);
        let members = vec![slow, candidate("backup", 5), fast, candidate("primary", 1)];

        let ranked = rank(RotationStrategy::Priority, &members, 0, &mut rand::thread_rng());
        assert_eq!(ids(&ranked), vec!["primary", "fast", "slow", "backup"]);
    }

    #[test]
    fn test_open_circuits_appended_not_dropped() {
        let mut broken = candidate("broken", 0);
        broken.circuit_open = true;
        let members = vec![broken, candidate("a", 1), candidate("b", 2)];

        for strategy in RotationStrategy::ALL {
            let ranked = rank(strategy, &members, 0, &mut rand::thread_rng());
            assert_eq!(ranked.len(), 3);
            assert_eq!(&*ranked[2], "broken", "{strategy}");
        }
    }

    #[test]
    fn test_round_robin_rotates_from_cursor() {
        let members = vec![candidate("a", 1), candidate("b", 1), candidate("c", 1)];
        let mut rng = rand::thread_rng();

        assert_eq!(ids(&rank(RotationStrategy::RoundRobin, &members, 0, &mut rng)), vec!["a", "b", "c"]);
        assert_eq!(ids(&rank(RotationStrategy::RoundRobin, &members, 1, &mut rng)), vec!["b", "c", "a"]);
        assert_eq!(ids(&rank(RotationStrategy::RoundRobin, &members, 5, &mut rng)), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_weighted_random_follows_weights() {
        let mut heavy = candidate("heavy", 1);
        heavy.weight = 3;
        let members = vec![heavy, candidate("light", 1)];
        let mut rng = StdRng::seed_from_u64(7);

        let trials = 4_000;
        let mut firsts: HashMap<String, usize> = HashMap::new();
        for _ in 0..trials {
            let ranked = rank(RotationStrategy::WeightedRandom, &members, 0, &mut rng);
            assert_eq!(ranked.len(), 2);
            *firsts.entry(ranked[0].to_string()).or_default() += 1;
        }

        let heavy_share = firsts["heavy"] as f64 / trials as f64;
        assert!((0.70..0.80).contains(&heavy_share), "heavy share {heavy_share}");
    }

    #[test]
    fn test_zero_weight_members_ranked_last() {
        let mut never = candidate("never", 1);
        never.weight = 0;
        let members = vec![never, candidate("a", 1), candidate("b", 1)];
        let ranked = rank(RotationStrategy::WeightedRandom, &members, 0, &mut StdRng::seed_from_u64(1));
        assert_eq!(&*ranked[2], "never");
    }

    #[test]
    fn test_least_used_prefers_idle_providers() {
        let mut busy = candidate("busy", 1);
        busy.total_requests = 40;
        let mut idle = candidate("idle", 9);
        idle.total_requests = 2;
        let members = vec![busy, idle];

        let ranked = rank(RotationStrategy::LeastUsed, &members, 0, &mut rand::thread_rng());
        assert_eq!(ids(&ranked), vec!["idle", "busy"]);
    }

    #[test]
    fn test_fastest_response_explores_unmeasured_first() {
        let mut quick = candidate("quick", 1);
        quick.average_response_ms = Some(50.0);
        let mut sluggish = candidate("sluggish", 1);
        sluggish.average_response_ms = Some(900.0);
        let members = vec![sluggish, quick, candidate("new", 1)];

        let ranked = rank(RotationStrategy::FastestResponse, &members, 0, &mut rand::thread_rng());
        assert_eq!(ids(&ranked), vec!["new", "quick", "sluggish"]);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "round-robin".parse::<RotationStrategy>().unwrap(),
            RotationStrategy::RoundRobin
        );
        assert!(matches!(
            "random".parse::<RotationStrategy>(),
            Err(ConfigError::UnknownStrategy(_))
        ));
        assert_eq!(
            serde_json::to_value(RotationStrategy::FastestResponse).unwrap(),
            serde_json::json!("fastest_response")
        );
    }
}
