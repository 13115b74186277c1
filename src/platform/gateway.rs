//! Platform gateway.
//!
//! Owns the live sessions (one per logged-in account) and the durable
//! trade-credential cache. Sessions are opened lazily on first use and
//! torn down explicitly; because a session is bound to the proxy the
//! account carried at login time, rotating a proxy always goes through
//! `close_session` first.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{PlatformSession, SessionFactory, WalletSnapshot};
use crate::storage::{CredentialCache, TradeCredentials};
use crate::types::{Account, Item};

pub struct PlatformGateway {
    factory: Box<dyn SessionFactory>,
    sessions: Mutex<HashMap<String, Arc<dyn PlatformSession>>>,
    credentials: std::sync::Mutex<CredentialCache>,
}

impl PlatformGateway {
    pub fn new(factory: Box<dyn SessionFactory>, credentials: CredentialCache) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
            credentials: std::sync::Mutex::new(credentials),
        }
    }

    /// Return the cached session for an account, logging in if needed.
    async fn session(&self, account: &Account) -> Result<Arc<dyn PlatformSession>> {
        if let Some(existing) = self.sessions.lock().await.get(&account.username) {
            return Ok(Arc::clone(existing));
        }

        debug!(account = %account, "Logging in");
        let fresh: Arc<dyn PlatformSession> = Arc::from(
            self.factory
                .login(account)
                .await
                .with_context(|| format!("Login failed for {account}"))?,
        );
        debug!(account = %account, "Logged in successfully");

        let raced = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&account.username) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    sessions.insert(account.username.clone(), Arc::clone(&fresh));
                    None
                }
            }
        };

        // A concurrent login for the same account won the race; keep the
        // registered session and discard ours.
        if let Some(existing) = raced {
            fresh.close().await;
            return Ok(existing);
        }
        Ok(fresh)
    }

    /// Tear down an account's session if one is open.
    pub async fn close_session(&self, account: &Account) {
        let removed = self.sessions.lock().await.remove(&account.username);
        if let Some(session) = removed {
            session.close().await;
            debug!(account = %account, "Session closed");
        }
    }

    /// Tear down every remaining open session.
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (username, session) in sessions {
            session.close().await;
            debug!(account = %username, "Session closed");
        }
    }

    pub async fn fetch_inventory(
        &self,
        account: &Account,
        app_id: u32,
        context_id: u32,
    ) -> Result<Vec<Item>> {
        let session = self.session(account).await?;
        session.fetch_inventory(app_id, context_id).await
    }

    pub async fn fetch_inventory_and_wallet(
        &self,
        account: &Account,
        app_id: u32,
        context_id: u32,
    ) -> Result<(Vec<Item>, WalletSnapshot)> {
        let session = self.session(account).await?;
        let items = session.fetch_inventory(app_id, context_id).await?;
        let wallet = session.fetch_wallet().await?;
        Ok((items, wallet))
    }

    /// Trade credentials for an account, cache-first. A fresh fetch is
    /// written through to durable storage for reuse across runs.
    pub async fn get_trade_credentials(&self, account: &Account) -> Result<TradeCredentials> {
        let cached = self
            .credentials
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential cache poisoned"))?
            .get(&account.username)
            .cloned();
        if let Some(credentials) = cached {
            debug!(account = %account, "Using cached trade credentials");
            return Ok(credentials);
        }

        debug!(account = %account, "Fetching trade credentials");
        let session = self.session(account).await?;
        let token = session.fetch_trade_token().await?;
        let credentials = TradeCredentials::new(session.steam_id64(), token);

        self.credentials
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential cache poisoned"))?
            .set(&account.username, credentials.clone())?;
        debug!(account = %account, "Trade credentials cached");
        Ok(credentials)
    }

    /// Send a trade offer from `sender` giving `items` to the partner.
    pub async fn send_trade_offer(
        &self,
        sender: &Account,
        items: &[Item],
        partner_steam_id64: u64,
        partner_token: &str,
    ) -> Result<u64> {
        let session = self.session(sender).await?;
        session
            .send_trade_offer(items, partner_steam_id64, partner_token)
            .await
    }

    /// Accept a trade offer on the acceptor's side.
    pub async fn accept_trade_offer(
        &self,
        acceptor: &Account,
        offer_id: u64,
        partner_steam_id64: u64,
    ) -> Result<()> {
        let session = self.session(acceptor).await?;
        session.accept_trade_offer(offer_id, partner_steam_id64).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MockPlatformSession, MockSessionFactory};
    use crate::types::AccountSecrets;
    use secrecy::SecretString;

    fn account(username: &str) -> Account {
        Account {
            username: username.to_string(),
            password: SecretString::new("pw".to_string()),
            secrets: AccountSecrets {
                shared_secret: SecretString::new("ss".to_string()),
                identity_secret: SecretString::new("is".to_string()),
            },
            proxy: None,
        }
    }

    fn stub_session(steam_id64: u64) -> MockPlatformSession {
        let mut session = MockPlatformSession::new();
        session.expect_steam_id64().return_const(steam_id64);
        session.expect_fetch_inventory().returning(|_, _| Ok(vec![]));
        session
            .expect_fetch_trade_token()
            .returning(|| Ok("token".to_string()));
        session.expect_close().returning(|| ());
        session
    }

    fn gateway_with_logins(expected_logins: usize) -> PlatformGateway {
        let mut factory = MockSessionFactory::new();
        factory
            .expect_login()
            .times(expected_logins)
            .returning(|_| Ok(Box::new(stub_session(76561198000000042))));
        PlatformGateway::new(Box::new(factory), CredentialCache::in_memory())
    }

    #[tokio::test]
    async fn test_session_reused_across_calls() {
        let gateway = gateway_with_logins(1);
        let acct = account("alice");

        gateway.fetch_inventory(&acct, 730, 2).await.unwrap();
        gateway.fetch_inventory(&acct, 730, 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_session_forces_relogin() {
        let gateway = gateway_with_logins(2);
        let acct = account("alice");

        gateway.fetch_inventory(&acct, 730, 2).await.unwrap();
        gateway.close_session(&acct).await;
        gateway.fetch_inventory(&acct, 730, 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_session_without_open_session_is_noop() {
        let gateway = gateway_with_logins(0);
        gateway.close_session(&account("nobody")).await;
    }

    #[tokio::test]
    async fn test_trade_credentials_fetched_once() {
        let gateway = gateway_with_logins(1);
        let acct = account("bob");

        let first = gateway.get_trade_credentials(&acct).await.unwrap();
        assert_eq!(first.steam_id64, 76561198000000042);
        assert_eq!(first.token, "token");

        // Second lookup is served from the cache (factory allows one login).
        let second = gateway.get_trade_credentials(&acct).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_trade_credentials_preloaded_cache_skips_login() {
        let mut cache = CredentialCache::in_memory();
        cache
            .set("carol", TradeCredentials::new(7, "preloaded"))
            .unwrap();
        let gateway = PlatformGateway::new(
            Box::new(MockSessionFactory::new()), // any login would panic
            cache,
        );

        let creds = gateway
            .get_trade_credentials(&account("carol"))
            .await
            .unwrap();
        assert_eq!(creds.token, "preloaded");
    }

    #[tokio::test]
    async fn test_login_failure_propagates() {
        let mut factory = MockSessionFactory::new();
        factory
            .expect_login()
            .returning(|_| anyhow::bail!("captcha required"));
        let gateway = PlatformGateway::new(Box::new(factory), CredentialCache::in_memory());

        let err = gateway
            .fetch_inventory(&account("dave"), 730, 2)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Login failed for dave"));
    }

    #[tokio::test]
    async fn test_close_all_drains_everything() {
        let gateway = gateway_with_logins(2);
        gateway.fetch_inventory(&account("a"), 730, 2).await.unwrap();
        gateway.fetch_inventory(&account("b"), 730, 2).await.unwrap();
        gateway.close_all().await;
        // Map is empty; closing again is a no-op.
        gateway.close_all().await;
    }
}
