//! Immutable catalogue of provider descriptors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ConfigError;
use crate::models::{Category, ProviderDescriptor, ProviderId};

/// Provider descriptors keyed by id, in load order.
///
/// Built once from configuration and shared by handle with every component
/// that needs provider identity or limits.
#[derive(Debug, Default)]
pub struct ProviderStore {
    descriptors: HashMap<ProviderId, Arc<ProviderDescriptor>>,
    order: Vec<ProviderId>,
}

impl ProviderStore {
    /// Validate and index the given descriptors.
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Result<Self, ConfigError> {
        let mut store = Self::default();

        for descriptor in descriptors {
            validate(&descriptor)?;
            if store.descriptors.contains_key(&descriptor.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider id '{}'",
                    descriptor.id
                )));
            }
            store.order.push(descriptor.id.clone());
            store
                .descriptors
                .insert(descriptor.id.clone(), Arc::new(descriptor));
        }

        Ok(store)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProviderDescriptor>> {
        self.descriptors.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.descriptors.contains_key(id)
    }

    /// Provider ids in load order.
    pub fn ids(&self) -> &[ProviderId] {
        &self.order
    }

    /// Descriptors serving `category`, in load order.
    pub fn by_category(&self, category: Category) -> Vec<Arc<ProviderDescriptor>> {
        self.iter().filter(|d| d.category == category).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<ProviderDescriptor>> + '_ {
        self.order.iter().filter_map(|id| self.descriptors.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn validate(descriptor: &ProviderDescriptor) -> Result<(), ConfigError> {
    let id = &descriptor.id;
    if id.trim().is_empty() {
        return Err(ConfigError::Invalid("provider id must not be empty".to_string()));
    }
    if descriptor.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("provider '{id}' has an empty base_url")));
    }
    if descriptor.rate_limit.max_requests == 0 {
        return Err(ConfigError::Invalid(format!(
            "provider '{id}' must allow at least one request per window"
        )));
    }
    if descriptor.rate_limit.window_seconds == 0 {
        return Err(ConfigError::Invalid(format!(
            "provider '{id}' has a zero-length rate window"
        )));
    }
    if descriptor.timeout_ms == 0 {
        return Err(ConfigError::Invalid(format!("provider '{id}' has a zero timeout")));
    }
    if descriptor.failure_threshold == Some(0) {
        return Err(ConfigError::Invalid(format!(
            "provider '{id}' has a zero failure threshold"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RateLimitSpec;

    fn descriptor(id: &str, category: Category) -> ProviderDescriptor {
        ProviderDescriptor::new(id, category, format!("https://{id}.test"))
    }

    #[test]
    fn test_store_preserves_load_order() {
        let store = ProviderStore::new(vec![
            descriptor("coingecko", Category::MarketData),
            descriptor("alternative_me", Category::Sentiment),
            descriptor("coincap", Category::MarketData),
        ])
        .unwrap();

        let ids: Vec<&str> = store.ids().iter().map(|id| &**id).collect();
        assert_eq!(ids, vec!["coingecko", "alternative_me", "coincap"]);

        let market: Vec<_> = store
            .by_category(Category::MarketData)
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(market, vec!["coingecko", "coincap"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ProviderStore::new(vec![
            descriptor("coingecko", Category::MarketData),
            descriptor("coingecko", Category::Ohlcv),
        ]);
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_zero_window_rejected() {
        let bad = descriptor("binance", Category::Ohlcv).with_rate_limit(RateLimitSpec::new(10, 0));
        assert!(ProviderStore::new(vec![bad]).is_err());
    }

    #[test]
    fn test_lookup_by_str() {
        let store = ProviderStore::new(vec![descriptor("cryptopanic", Category::News)]).unwrap();
        assert!(store.contains("cryptopanic"));
        assert_eq!(store.get("cryptopanic").unwrap().category, Category::News);
        assert!(store.get("missing").is_none());
    }
}
