//! Persistence layer.
//!
//! Durable cache of trade credentials keyed by account identity. Trade
//! credentials (partner id + token) are fetched once per account and are
//! expensive to re-derive, so they are written through to a JSON file on
//! each new fetch and restored at startup for reuse across runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default credential cache path.
const DEFAULT_CACHE_FILE: &str = "data/trade.json";

/// The credentials required to address a transfer to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCredentials {
    pub steam_id64: u64,
    pub token: String,
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl TradeCredentials {
    pub fn new(steam_id64: u64, token: impl Into<String>) -> Self {
        Self {
            steam_id64,
            token: token.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Write-through credential cache backed by a JSON file.
#[derive(Debug)]
pub struct CredentialCache {
    path: Option<PathBuf>,
    entries: HashMap<String, TradeCredentials>,
}

impl CredentialCache {
    /// Load the cache from disk. A missing file starts an empty cache.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = PathBuf::from(path.unwrap_or(DEFAULT_CACHE_FILE));

        if !path.exists() {
            info!(path = %path.display(), "No credential cache found, starting empty");
            return Ok(Self {
                path: Some(path),
                entries: HashMap::new(),
            });
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credential cache {}", path.display()))?;
        let entries: HashMap<String, TradeCredentials> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse credential cache {}", path.display()))?;

        info!(
            path = %path.display(),
            accounts = entries.len(),
            "Credential cache loaded"
        );

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// An unbacked cache. Nothing is persisted; used by tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, username: &str) -> Option<&TradeCredentials> {
        self.entries.get(username)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert credentials for an account and write the cache through to
    /// disk.
    pub fn set(&mut self, username: &str, credentials: TradeCredentials) -> Result<()> {
        self.entries.insert(username.to_string(), credentials);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialise credential cache")?;
        std::fs::write(path, &json)
            .with_context(|| format!("Failed to write credential cache {}", path.display()))?;
        debug!(path = %path.display(), accounts = self.entries.len(), "Credential cache saved");
        Ok(())
    }
}

/// Delete a cache file (for testing or reset).
pub fn delete_cache(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete credential cache {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
