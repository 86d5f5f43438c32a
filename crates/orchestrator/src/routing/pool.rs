//! Provider pools per data category.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::Serialize;

use super::strategy::{rank, Candidate, RotationStrategy};
use crate::config::PoolConfig;
use crate::errors::{ConfigError, PoolError};
use crate::models::{Category, ProviderId};
use crate::registry::{HealthTracker, ProviderStore};

/// Interchangeable providers for one category.
#[derive(Debug)]
pub struct Pool {
    category: Category,
    strategy: RotationStrategy,
    members: RwLock<Vec<ProviderId>>,
    cursor: AtomicUsize,
}

impl Pool {
    fn new(category: Category, strategy: RotationStrategy, members: Vec<ProviderId>) -> Self {
        Self {
            category,
            strategy,
            members: RwLock::new(members),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ProviderId>> {
        self.members.read().unwrap_or_else(|poisoned| {
            warn!("Pool '{}' lock was poisoned, recovering", self.category);
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ProviderId>> {
        self.members.write().unwrap_or_else(|poisoned| {
            warn!("Pool '{}' lock was poisoned, recovering", self.category);
            poisoned.into_inner()
        })
    }

    /// Members in configured order.
    pub fn members(&self) -> Vec<ProviderId> {
        self.read().clone()
    }

    /// Current round-robin cursor.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}

/// Serializable description of a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolInfo {
    pub category: Category,
    pub strategy: RotationStrategy,
    pub members: Vec<ProviderId>,
}

/// Owns every pool and produces ranked candidate sequences.
pub struct PoolManager {
    store: Arc<ProviderStore>,
    health: Arc<HealthTracker>,
    pools: BTreeMap<Category, Pool>,
}

impl PoolManager {
    /// Build pools from configuration.
    ///
    /// Pools without explicit members take every provider of their category
    /// in load order. Categories that have providers but no pool get a
    /// priority pool.
    pub fn new(
        store: Arc<ProviderStore>,
        health: Arc<HealthTracker>,
        configs: &[PoolConfig],
    ) -> Result<Self, ConfigError> {
        let mut pools = BTreeMap::new();

        for config in configs {
            if pools.contains_key(&config.category) {
                return Err(ConfigError::Invalid(format!(
                    "more than one pool for category {}",
                    config.category
                )));
            }
            let members = resolve_members(&store, config)?;
            pools.insert(
                config.category,
                Pool::new(config.category, config.strategy, members),
            );
        }

        for category in Category::ALL {
            if pools.contains_key(&category) {
                continue;
            }
            let members: Vec<ProviderId> = store
                .by_category(category)
                .iter()
                .map(|d| d.id.clone())
                .collect();
            if !members.is_empty() {
                debug!("Pools: no pool for {category}, using priority over {} providers", members.len());
                pools.insert(category, Pool::new(category, RotationStrategy::Priority, members));
            }
        }

        Ok(Self {
            store,
            health,
            pools,
        })
    }

    fn pool(&self, category: Category) -> Result<&Pool, PoolError> {
        self.pools
            .get(&category)
            .ok_or(PoolError::UnknownPool(category))
    }

    /// Full ranked candidate sequence for the next request in `category`.
    ///
    /// For round-robin pools this advances the cursor by one.
    pub fn ranked_candidates(&self, category: Category) -> Result<Vec<ProviderId>, PoolError> {
        let pool = self.pool(category)?;
        let members = pool.members();
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<Candidate> = members.iter().map(|id| self.candidate(id)).collect();
        let cursor = match pool.strategy {
            RotationStrategy::RoundRobin => pool.cursor.fetch_add(1, Ordering::AcqRel),
            _ => 0,
        };

        let ranked = rank(pool.strategy, &candidates, cursor, &mut rand::thread_rng());
        debug!(
            "Pools: {} ranked [{}] via {}",
            category,
            ranked.iter().map(|id| &**id).collect::<Vec<_>>().join(", "),
            pool.strategy
        );
        Ok(ranked)
    }

    /// First candidate of the ranked sequence.
    pub fn get_next(&self, category: Category) -> Result<Option<ProviderId>, PoolError> {
        Ok(self.ranked_candidates(category)?.into_iter().next())
    }

    /// Move a round-robin cursor past `failed` if it is the member the next
    /// selection would start from. Returns whether the cursor moved.
    pub fn rotate_on_failure(&self, category: Category, failed: &str) -> Result<bool, PoolError> {
        let pool = self.pool(category)?;
        if pool.strategy != RotationStrategy::RoundRobin {
            return Ok(false);
        }

        let members = pool.read();
        if members.is_empty() {
            return Ok(false);
        }
        let rotated = pool
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                (&*members[cursor % members.len()] == failed).then_some(cursor + 1)
            })
            .is_ok();

        if rotated {
            debug!("Pools: rotated {} past '{}'", category, failed);
        }
        Ok(rotated)
    }

    /// Add a provider to its category's pool at runtime.
    pub fn add_member(&self, category: Category, provider_id: &str) -> Result<(), PoolError> {
        let pool = self.pool(category)?;
        let descriptor = self
            .store
            .get(provider_id)
            .ok_or_else(|| PoolError::UnknownProvider(provider_id.to_string()))?;
        if descriptor.category != category {
            return Err(PoolError::CategoryMismatch {
                provider: provider_id.to_string(),
                expected: category,
                actual: descriptor.category,
            });
        }

        let mut members = pool.write();
        if members.iter().any(|m| &**m == provider_id) {
            return Err(PoolError::DuplicateMember {
                provider: provider_id.to_string(),
                category,
            });
        }
        members.push(descriptor.id.clone());
        info!("Pools: added '{}' to {} pool", provider_id, category);
        Ok(())
    }

    /// Remove a provider from a pool. Returns whether it was a member.
    pub fn remove_member(&self, category: Category, provider_id: &str) -> Result<bool, PoolError> {
        let pool = self.pool(category)?;
        let mut members = pool.write();
        let before = members.len();
        members.retain(|m| &**m != provider_id);
        let removed = members.len() != before;
        if removed {
            info!("Pools: removed '{}' from {} pool", provider_id, category);
        }
        Ok(removed)
    }

    pub fn members(&self, category: Category) -> Result<Vec<ProviderId>, PoolError> {
        Ok(self.pool(category)?.members())
    }

    pub fn pools(&self) -> Vec<PoolInfo> {
        self.pools
            .values()
            .map(|pool| PoolInfo {
                category: pool.category,
                strategy: pool.strategy,
                members: pool.members(),
            })
            .collect()
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.pools.keys().copied()
    }

    fn candidate(&self, id: &ProviderId) -> Candidate {
        let snapshot = self.health.snapshot(id);
        let (priority, weight) = self
            .store
            .get(id)
            .map(|d| (d.priority, d.weight))
            .unwrap_or((i32::MAX, 0));
        Candidate {
            id: id.clone(),
            priority,
            weight,
            average_response_ms: snapshot.average_response_ms,
            total_requests: snapshot.total_requests,
            circuit_open: snapshot.is_open(),
        }
    }
}

pub(crate) fn resolve_members(store: &ProviderStore, config: &PoolConfig) -> Result<Vec<ProviderId>, ConfigError> {
    let members: Vec<ProviderId> = if config.members.is_empty() {
        store
            .by_category(config.category)
            .iter()
            .map(|d| d.id.clone())
            .collect()
    } else {
        let mut resolved = Vec::with_capacity(config.members.len());
        for member in &config.members {
            let descriptor = store.get(member).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "pool {} references unknown provider '{}'",
                    config.category, member
                ))
            })?;
            if descriptor.category != config.category {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' serves {}, not {}",
                    member, descriptor.category, config.category
                )));
            }
            if resolved.contains(&descriptor.id) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' listed twice in the {} pool",
                    member, config.category
                )));
            }
            resolved.push(descriptor.id.clone());
        }
        resolved
    };

    if members.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "pool {} has no members",
            config.category
        )));
    }

    if config.strategy == RotationStrategy::WeightedRandom {
        if let Some(zero) = members
            .iter()
            .find(|id| store.get(id).map_or(true, |d| d.weight == 0))
        {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' needs a positive weight in the weighted {} pool",
                zero, config.category
            )));
        }
    }

    Ok(members)
}
