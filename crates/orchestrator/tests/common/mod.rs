//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Barrier;

use coinpulse_orchestrator::{
    Category, DataProvider, ManualClock, Orchestrator, OrchestratorConfig, PoolConfig,
    ProviderDescriptor, ProviderError, ProviderQuery, RateLimitSpec, RawResponse,
    RotationStrategy,
};

/// What a scripted provider does on every call.
#[derive(Clone, Debug)]
pub enum Behavior {
    Succeed(Value),
    Status(u16),
    RateLimited,
    Sleep(Duration),
}

/// Provider whose behaviour tests can change between calls.
pub struct ScriptedProvider {
    id: String,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    barrier: Option<Arc<Barrier>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            barrier: None,
            delay: None,
        }
    }

    pub fn ok(id: &str) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Succeed(json!({ "from": id }))))
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Status(503)))
    }

    /// Every call waits until `barrier` releases before answering.
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Every call sleeps before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, _query: &ProviderQuery) -> Result<RawResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Succeed(value) => Ok(RawResponse::json(&value)),
            Behavior::Status(status) => Err(ProviderError::Unavailable {
                provider: self.id.clone(),
                status,
            }),
            Behavior::RateLimited => Err(ProviderError::RateLimited {
                provider: self.id.clone(),
                retry_after: None,
            }),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(RawResponse::json(&json!({ "from": self.id, "late": true })))
            }
        }
    }
}

pub fn descriptor(id: &str, category: Category, priority: i32) -> ProviderDescriptor {
    ProviderDescriptor::new(id, category, format!("https://{id}.invalid"))
        .with_priority(priority)
        .with_rate_limit(RateLimitSpec::new(1_000, 60))
}

pub fn config(
    providers: Vec<ProviderDescriptor>,
    strategy: RotationStrategy,
    category: Category,
) -> OrchestratorConfig {
    OrchestratorConfig {
        providers,
        pools: vec![PoolConfig {
            category,
            strategy,
            members: Vec::new(),
        }],
        ..OrchestratorConfig::default()
    }
}

/// Build an orchestrator over scripted providers with a manual clock.
pub fn orchestrator(
    config: OrchestratorConfig,
    providers: &[Arc<ScriptedProvider>],
    clock: Arc<ManualClock>,
) -> Orchestrator {
    let mut builder = Orchestrator::builder(config).with_clock(clock);
    for provider in providers {
        builder = builder.with_provider(provider.clone());
    }
    builder.build().expect("valid test configuration")
}

/// Three market-data providers with priorities 1, 2, 3.
pub fn three_market_providers() -> Vec<ProviderDescriptor> {
    vec![
        descriptor("alpha", Category::MarketData, 1),
        descriptor("beta", Category::MarketData, 2),
        descriptor("gamma", Category::MarketData, 3),
    ]
}
