use std::path::Path;
use std::sync::Arc;

use coinpulse_orchestrator::{HttpJsonProvider, Orchestrator, OrchestratorConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<OrchestratorConfig> {
    let config = OrchestratorConfig::from_path(path)?;
    tracing::info!(
        "Loaded {} providers and {} pools from {}",
        config.providers.len(),
        config.pools.len(),
        path.display()
    );
    Ok(config)
}

/// Register an HTTP plugin for every configured provider.
pub fn build_orchestrator(config: OrchestratorConfig) -> anyhow::Result<Orchestrator> {
    let mut builder = Orchestrator::builder(config.clone());
    for descriptor in config.providers {
        if descriptor.auth_required {
            let has_key = descriptor
                .api_key_env
                .as_deref()
                .is_some_and(|var| std::env::var(var).is_ok());
            if !has_key {
                tracing::warn!(
                    provider = %descriptor.id,
                    env = descriptor.api_key_env.as_deref().unwrap_or("-"),
                    "API key missing; provider will be skipped at fetch time"
                );
            }
        }
        builder = builder.with_provider(Arc::new(HttpJsonProvider::from_env(Arc::new(descriptor))));
    }
    Ok(builder.build()?)
}
