//! Dry-run platform sessions.
//!
//! Simulates the trading platform against fixture inventories so the full
//! engine — pool building, selection, retries, depletion, outcome logs —
//! can be exercised without touching the network. Real execution plugs in
//! by swapping this factory for the protocol client behind the same
//! `SessionFactory` seam.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::{PlatformSession, SessionFactory, WalletSnapshot};
use crate::types::{Account, Item};

/// Base offset for simulated 64-bit account ids.
const ID64_BASE: u64 = 76_561_198_000_000_000;

fn simulated_id64(username: &str) -> u64 {
    // FNV-1a keeps ids stable across runs for the same username.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in username.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    ID64_BASE + hash % 10_000_000
}

/// Session factory that fabricates deterministic in-memory sessions.
pub struct DryRunFactory {
    inventories: HashMap<String, Vec<Item>>,
    next_offer: Arc<AtomicU64>,
}

impl DryRunFactory {
    pub fn new(inventories: HashMap<String, Vec<Item>>) -> Self {
        Self {
            inventories,
            next_offer: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Load fixture inventories (username → items) from a JSON file.
    /// A missing file yields empty inventories for every account.
    pub fn from_fixture(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!(path, "No dry-run fixture found, using empty inventories");
            return Ok(Self::new(HashMap::new()));
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dry-run fixture {path}"))?;
        let inventories: HashMap<String, Vec<Item>> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse dry-run fixture {path}"))?;
        info!(path, accounts = inventories.len(), "Dry-run fixture loaded");
        Ok(Self::new(inventories))
    }
}

#[async_trait]
impl SessionFactory for DryRunFactory {
    async fn login(&self, account: &Account) -> Result<Box<dyn PlatformSession>> {
        info!(
            account = %account,
            proxy = ?account.proxy.as_ref().map(|p| p.to_string()),
            "[DRY RUN] Logged in"
        );
        Ok(Box::new(DryRunSession {
            username: account.username.clone(),
            steam_id64: simulated_id64(&account.username),
            items: self
                .inventories
                .get(&account.username)
                .cloned()
                .unwrap_or_default(),
            next_offer: Arc::clone(&self.next_offer),
        }))
    }
}

struct DryRunSession {
    username: String,
    steam_id64: u64,
    items: Vec<Item>,
    next_offer: Arc<AtomicU64>,
}

#[async_trait]
impl PlatformSession for DryRunSession {
    fn steam_id64(&self) -> u64 {
        self.steam_id64
    }

    async fn fetch_inventory(&self, app_id: u32, context_id: u32) -> Result<Vec<Item>> {
        Ok(self
            .items
            .iter()
            .filter(|item| item.app_id == app_id && item.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn fetch_wallet(&self) -> Result<WalletSnapshot> {
        Ok(WalletSnapshot {
            total: 0.0,
            currency_code: Some(1),
        })
    }

    async fn fetch_trade_token(&self) -> Result<String> {
        Ok(format!("DRYRUN-{}", self.username))
    }

    async fn send_trade_offer(
        &self,
        items: &[Item],
        partner_steam_id64: u64,
        _partner_token: &str,
    ) -> Result<u64> {
        let offer_id = self.next_offer.fetch_add(1, Ordering::Relaxed);
        info!(
            account = %self.username,
            partner = partner_steam_id64,
            count = items.len(),
            offer_id,
            "[DRY RUN] Would send trade offer"
        );
        Ok(offer_id)
    }

    async fn accept_trade_offer(&self, offer_id: u64, partner_steam_id64: u64) -> Result<()> {
        info!(
            account = %self.username,
            partner = partner_steam_id64,
            offer_id,
            "[DRY RUN] Would accept trade offer"
        );
        Ok(())
    }

    async fn close(&self) {
        debug!(account = %self.username, "[DRY RUN] Session closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
