//! Trading platform integration.
//!
//! Defines the session traits the engine drives and the gateway that
//! manages session and credential lifecycles on top of them. The actual
//! login handshake, inventory endpoints, trade-offer transmission and
//! mobile confirmation live behind `SessionFactory`/`PlatformSession`;
//! everything above those seams (session caching, proxy binding,
//! credential reuse) is owned by this crate.

pub mod dryrun;
pub mod gateway;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Account, Item};

/// Wallet contents as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalletSnapshot {
    /// Balance in the wallet's own currency.
    pub total: f64,
    /// Platform currency code; `None` when the wallet reports no currency.
    pub currency_code: Option<u32>,
}

/// An authenticated platform session bound to one account and one proxy.
///
/// All calls are sequential suspension points; implementors enforce their
/// own network timeouts. A session that fails keeps its account logged in
/// on the platform side until `close` is called.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// The account's 64-bit platform identity.
    fn steam_id64(&self) -> u64;

    /// Fetch the account's inventory for an app/context pair.
    async fn fetch_inventory(&self, app_id: u32, context_id: u32) -> Result<Vec<Item>>;

    /// Fetch the account's wallet balance.
    async fn fetch_wallet(&self) -> Result<WalletSnapshot>;

    /// Fetch the account's trade token (the gateway caches the result).
    async fn fetch_trade_token(&self) -> Result<String>;

    /// Send a trade offer giving `items` to the partner. May perform an
    /// out-of-band mobile confirmation before returning the offer id.
    async fn send_trade_offer(
        &self,
        items: &[Item],
        partner_steam_id64: u64,
        partner_token: &str,
    ) -> Result<u64>;

    /// Accept a trade offer previously sent to this account.
    async fn accept_trade_offer(&self, offer_id: u64, partner_steam_id64: u64) -> Result<()>;

    /// Tear down the session. Infallible by contract; implementors log
    /// and swallow transport errors.
    async fn close(&self);
}

/// Performs the platform login handshake for an account, honoring the
/// account's currently bound proxy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn login(&self, account: &Account) -> Result<Box<dyn PlatformSession>>;
}
