//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Balance granted to a new wallet, in minor currency units.
    pub starting_balance: i64,
    pub settlement_interval_secs: u64,
    /// Oldest odds snapshot accepted at placement time.
    pub placement_max_age_secs: u64,
    /// Oldest score board trusted for payouts; staler sports are deferred.
    pub settle_max_age_secs: u64,
    pub max_parlay_legs: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bookmaker region passed to the odds endpoint.
    pub region: String,
    /// Request credits allowed per quota window.
    pub quota_budget: u32,
    pub quota_window_secs: u64,
    pub odds_ttl_secs: u64,
    pub scores_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
