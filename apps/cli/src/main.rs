mod config;
mod main_lib;

use coinpulse_orchestrator::{FetchRequest, FetchResponse};
use config::{parse_probe, Command, Config};
use main_lib::{build_orchestrator, init_tracing, load_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Config { cli } = Config::from_env();
    init_tracing(&cli.log_format);
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Validate => {
            println!("{} is valid", cli.config.display());
        }
        Command::Pools => {
            let orchestrator = build_orchestrator(config)?;
            println!("{}", serde_json::to_string_pretty(&orchestrator.pools())?);
        }
        Command::Fetch {
            category,
            key,
            cache_mode,
            repeat,
        } => {
            let orchestrator = build_orchestrator(config)?;
            for _ in 0..repeat.max(1) {
                let request = FetchRequest::new(category, key.as_str())
                    .with_requester("cli")
                    .with_cache_mode(cache_mode);
                let response = FetchResponse::from(orchestrator.fetch_with(request).await);
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
        Command::Status { probes } => {
            let orchestrator = build_orchestrator(config)?;
            for probe in &probes {
                let (category, key) = parse_probe(probe)?;
                if let Err(e) = orchestrator.fetch(category, &key).await {
                    tracing::warn!("Probe {} failed: {}", probe, e);
                }
            }
            println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
        }
    }

    Ok(())
}
