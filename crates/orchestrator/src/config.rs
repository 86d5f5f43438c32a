//! Declarative orchestrator configuration.
//!
//! A JSON document with `providers`, `pools` and optional tuning sections.
//! Every section has serde defaults, so a minimal file only lists providers
//! (pools are derived per category when omitted).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::{Category, ProviderDescriptor};
use crate::registry::{BackoffConfig, CircuitBreakerConfig, ProviderStore};
use crate::routing::{resolve_members, RotationStrategy};

const DEFAULT_MAX_CANDIDATES: usize = 8;

/// Pool definition for one category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub category: Category,
    #[serde(default)]
    pub strategy: RotationStrategy,
    /// Provider ids in order. Empty means every provider of the category.
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub base_cooldown_secs: u64,
    pub max_cooldown_secs: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            base_cooldown_secs: defaults.base_cooldown.as_secs(),
            max_cooldown_secs: defaults.max_cooldown.as_secs(),
        }
    }
}

impl CircuitSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            base_cooldown: Duration::from_secs(self.base_cooldown_secs),
            max_cooldown: Duration::from_secs(self.max_cooldown_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub schedule_secs: Vec<u64>,
    pub blacklist_after: u32,
    pub blacklist_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let defaults = BackoffConfig::default();
        Self {
            schedule_secs: defaults.schedule.iter().map(Duration::as_secs).collect(),
            blacklist_after: defaults.blacklist_after,
            blacklist_secs: defaults.blacklist_duration.as_secs(),
        }
    }
}

impl BackoffSettings {
    pub fn to_backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            schedule: self
                .schedule_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            blacklist_after: self.blacklist_after,
            blacklist_duration: Duration::from_secs(self.blacklist_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    /// Per-category TTL overrides.
    pub ttl_secs: HashMap<Category, u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: crate::cache::DEFAULT_TTL.as_secs(),
            ttl_secs: HashMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn ttl_overrides(&self) -> HashMap<Category, Duration> {
        self.ttl_secs
            .iter()
            .map(|(category, secs)| (*category, Duration::from_secs(*secs)))
            .collect()
    }
}

/// Complete orchestrator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,

    #[serde(default)]
    pub pools: Vec<PoolConfig>,

    #[serde(default)]
    pub circuit: CircuitSettings,

    #[serde(default)]
    pub backoff: BackoffSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    /// Upper bound on candidates walked per fetch.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Share one upstream call between concurrent fetches of the same key.
    #[serde(default = "default_coalesce")]
    pub coalesce_requests: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            pools: Vec::new(),
            circuit: CircuitSettings::default(),
            backoff: BackoffSettings::default(),
            cache: CacheSettings::default(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
            coalesce_requests: true,
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check cross-references and limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let store = ProviderStore::new(self.providers.clone())?;

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.category) {
                return Err(ConfigError::Invalid(format!(
                    "more than one pool for category {}",
                    pool.category
                )));
            }
            resolve_members(&store, pool)?;
        }

        if self.circuit.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit.failure_threshold must be positive".to_string(),
            ));
        }
        if self.circuit.base_cooldown_secs == 0
            || self.circuit.base_cooldown_secs > self.circuit.max_cooldown_secs
        {
            return Err(ConfigError::Invalid(
                "circuit cooldowns must satisfy 0 < base_cooldown_secs <= max_cooldown_secs"
                    .to_string(),
            ));
        }
        if self.backoff.schedule_secs.is_empty() || self.backoff.blacklist_after == 0 {
            return Err(ConfigError::Invalid(
                "backoff needs a non-empty schedule and a positive blacklist_after".to_string(),
            ));
        }
        if self.max_candidates == 0 {
            return Err(ConfigError::Invalid(
                "max_candidates must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

fn default_coalesce() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r#"{
        "providers": [
            { "id": "coingecko", "category": "market_data", "base_url": "https://api.coingecko.com/api/v3" },
            { "id": "alternative_me", "category": "sentiment", "base_url": "https://api.alternative.me" }
        ]
    }"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = OrchestratorConfig::from_json_str(MINIMAL).unwrap();

        assert_eq!(config.providers.len(), 2);
        assert!(config.pools.is_empty());
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.circuit.base_cooldown_secs, 30);
        assert_eq!(config.circuit.max_cooldown_secs, 300);
        assert_eq!(config.backoff.schedule_secs, vec![120, 240, 600]);
        assert_eq!(config.backoff.blacklist_after, 3);
        assert_eq!(config.backoff.blacklist_secs, 240);
        assert_eq!(config.cache.default_ttl_secs, 60);
        assert_eq!(config.max_candidates, 8);
        assert!(config.coalesce_requests);
    }

    #[test]
    fn test_full_config_parses() {
        let json = r#"{
            "providers": [
                { "id": "binance", "category": "ohlcv", "base_url": "https://api.binance.com",
                  "priority": 1, "weight": 3, "timeout_ms": 8000,
                  "rate_limit": { "max_requests": 1200, "window_seconds": 60 } },
                { "id": "cryptocompare", "category": "ohlcv", "base_url": "https://min-api.cryptocompare.com",
                  "priority": 2, "api_key_env": "CRYPTOCOMPARE_KEY", "auth_required": true,
                  "rate_limit": { "max_requests": 50, "window_seconds": 60, "min_interval_ms": 10000 } }
            ],
            "pools": [ { "category": "ohlcv", "strategy": "weighted_random", "members": ["binance", "cryptocompare"] } ],
            "circuit": { "failure_threshold": 5 },
            "cache": { "ttl_secs": { "ohlcv": 300 } },
            "coalesce_requests": false
        }"#;
        let config = OrchestratorConfig::from_json_str(json).unwrap();

        assert_eq!(config.pools[0].strategy, RotationStrategy::WeightedRandom);
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.circuit.base_cooldown_secs, 30);
        assert_eq!(
            config.cache.ttl_overrides().get(&Category::Ohlcv),
            Some(&Duration::from_secs(300))
        );
        assert_eq!(config.providers[1].rate_limit.min_interval_ms, 10_000);
        assert!(!config.coalesce_requests);
    }

    #[test]
    fn test_pool_with_unknown_member_rejected() {
        let json = r#"{
            "providers": [ { "id": "coingecko", "category": "market_data", "base_url": "https://x" } ],
            "pools": [ { "category": "market_data", "members": ["coingecko", "ghost"] } ]
        }"#;
        let err = OrchestratorConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_strategy_is_parse_error() {
        let json = r#"{ "pools": [ { "category": "news", "strategy": "coin_flip" } ] }"#;
        assert!(matches!(
            OrchestratorConfig::from_json_str(json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let json = r#"{
            "providers": [ { "id": "a", "category": "news", "base_url": "https://x",
                             "rate_limit": { "max_requests": 0, "window_seconds": 60 } } ]
        }"#;
        assert!(OrchestratorConfig::from_json_str(json).is_err());

        let mut config = OrchestratorConfig::from_json_str(MINIMAL).unwrap();
        config.max_candidates = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = OrchestratorConfig::from_path(file.path()).unwrap();
        assert_eq!(&*config.providers[0].id, "coingecko");

        let missing = OrchestratorConfig::from_path("/definitely/not/here.json");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_settings_convert_to_runtime_configs() {
        let backoff = BackoffSettings::default().to_backoff_config();
        assert_eq!(backoff.schedule[1], Duration::from_secs(240));

        let circuit = CircuitSettings {
            failure_threshold: 4,
            base_cooldown_secs: 10,
            max_cooldown_secs: 80,
        }
        .to_breaker_config();
        assert_eq!(circuit.max_cooldown, Duration::from_secs(80));
    }
}
