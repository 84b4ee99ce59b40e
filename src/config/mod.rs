#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use toml_config::NoticeSyncConfig;

/// Database URL used with `--dry-run`, where nothing connects to it.
#[cfg(feature = "cli")]
const DRY_RUN_DATABASE_URL: &str = "postgres://localhost/notice_sync";

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "notice-sync")]
#[command(about = "Stages legal notices and keeps them in sync with the TRON notice contract")]
pub struct CliConfig {
    /// Path to a TOML configuration file; environment variables are used otherwise
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[arg(long, global = true)]
    pub chain_endpoint: Option<String>,

    #[arg(long, global = true)]
    pub contract: Option<String>,

    #[arg(long, global = true, hide = true)]
    pub api_key: Option<String>,

    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Keep everything in memory instead of PostgreSQL
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: cli::Command,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// Loads the file (or environment) configuration and applies flag overrides.
    pub fn resolve(&self) -> Result<NoticeSyncConfig> {
        let mut config = match &self.config {
            Some(path) => NoticeSyncConfig::from_file(path)?,
            None => NoticeSyncConfig::from_lookup(|name| self.lookup(name))?,
        };

        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(endpoint) = &self.chain_endpoint {
            config.chain.endpoint = endpoint.clone();
        }
        if let Some(contract) = &self.contract {
            config.chain.contract_address = contract.clone();
        }
        if let Some(key) = &self.api_key {
            config.chain.api_key = Some(key.clone());
        }
        if let Some(interval) = self.poll_interval_ms {
            config.sync.poll_interval_ms = Some(interval);
        }
        Ok(config)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        let flag = match name {
            "DATABASE_URL" => self.database_url.clone(),
            "TRON_API_URL" => self.chain_endpoint.clone(),
            "CONTRACT_ADDRESS" => self.contract.clone(),
            "TRON_API_KEY" => self.api_key.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(name).ok()).or_else(|| {
            (self.dry_run && name == "DATABASE_URL").then(|| DRY_RUN_DATABASE_URL.to_string())
        })
    }
}
