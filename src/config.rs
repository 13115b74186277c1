//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the pricing bearer token) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`. Numeric ranges are
//! validated at load time so that a bad config aborts before any session
//! is opened.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub program: ProgramConfig,
    pub trade: TradeConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProgramConfig {
    /// Attempts per acceptor before it is recorded as an error. 1..=10.
    pub trade_attempts: u32,
    /// Delay between consecutive acceptors, in seconds. >= 1.
    pub trade_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradeConfig {
    #[serde(default = "default_app_id")]
    pub app_id: u32,
    #[serde(default = "default_context_id")]
    pub context_id: u32,
    /// Monetary target each acceptor is raised to, in USD.
    pub target: f64,
    /// Allowed excess above target when no exact combination exists.
    #[serde(default = "default_overfill")]
    pub overfill: f64,
    /// Whether the acceptor's existing inventory counts toward the target.
    #[serde(default = "default_true")]
    pub count_acceptor_inventory: bool,
    /// Whether the acceptor's wallet balance counts toward the target.
    #[serde(default = "default_true")]
    pub count_acceptor_wallet: bool,
    /// Keep only items whose name contains one of these substrings.
    #[serde(default)]
    pub items_whitelist: Option<Vec<String>>,
    /// Drop items whose name contains one of these substrings.
    #[serde(default)]
    pub items_blacklist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    pub url: String,
    /// Env-var name holding the bearer token; empty token if unset.
    #[serde(default)]
    pub token_env: Option<String>,
}

fn default_app_id() -> u32 {
    730
}

fn default_context_id() -> u32 {
    2
}

fn default_overfill() -> f64 {
    0.50
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=10).contains(&self.program.trade_attempts),
            "program.trade_attempts must be in 1..=10, got {}",
            self.program.trade_attempts,
        );
        anyhow::ensure!(
            self.program.trade_delay_secs >= 1,
            "program.trade_delay_secs must be >= 1",
        );
        anyhow::ensure!(self.trade.target > 0.0, "trade.target must be positive");
        anyhow::ensure!(
            self.trade.overfill >= 0.0,
            "trade.overfill must not be negative",
        );
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
