use std::path::PathBuf;

use clap::{Parser, Subcommand};
use coinpulse_orchestrator::{CacheMode, Category};

/// Command line for the coinpulse orchestrator.
#[derive(Debug, Parser)]
#[command(name = "coinpulse", version, about = "Multi-provider crypto data fetcher")]
pub struct Cli {
    /// Orchestrator configuration file (JSON).
    #[arg(long, short, env = "COINPULSE_CONFIG", default_value = "coinpulse.json")]
    pub config: PathBuf,

    /// Log output format: text or json.
    #[arg(long, env = "COINPULSE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch one logical query through the provider pool.
    Fetch {
        /// Data category (market_data, ohlcv, news, sentiment, onchain).
        category: Category,
        /// Logical query key, e.g. `bitcoin` or `BTCUSDT:1h`.
        key: String,
        /// Cache behaviour: use, refresh or bypass.
        #[arg(long, default_value = "use")]
        cache_mode: CacheMode,
        /// Repeat the fetch this many times, printing each result.
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Fetch once per category key pair, then print the status export.
    Status {
        /// `category:key` pairs to warm up before printing status.
        #[arg(long = "probe", value_name = "CATEGORY:KEY")]
        probes: Vec<String>,
    },
    /// Print the configured pools.
    Pools,
    /// Validate the configuration file and exit.
    Validate,
}

/// Resolved runtime settings.
#[derive(Debug)]
pub struct Config {
    pub cli: Cli,
}

impl Config {
    /// Load `.env` (if present) before parsing so env-backed flags see it.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self { cli: Cli::parse() }
    }
}

/// Split a `category:key` probe.
pub fn parse_probe(probe: &str) -> anyhow::Result<(Category, String)> {
    let (category, key) = probe
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("probe '{probe}' must look like category:key"))?;
    Ok((category.parse()?, key.to_string()))
}
