//! End-to-end distribution runs over scripted platform sessions.
//!
//! Provides a deterministic `SessionFactory` implementation that returns
//! known inventories, accepts trade offers, and can be told to fail — all
//! in-memory with no external dependencies — then drives the orchestrator
//! through complete runs.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use courier::accounts::AccountStore;
use courier::config::{AppConfig, PricingConfig, ProgramConfig, TradeConfig};
use courier::engine::optimizer::Optimizer;
use courier::engine::orchestrator::Orchestrator;
use courier::engine::planner::TradePlanner;
use courier::engine::results::ResultsTracker;
use courier::platform::gateway::PlatformGateway;
use courier::platform::{PlatformSession, SessionFactory, WalletSnapshot};
use courier::pricing::{Game, PriceSource};
use courier::proxy::ProxyPool;
use courier::storage::CredentialCache;
use courier::types::{Account, AccountSecrets, Item, Proxy};

// ---------------------------------------------------------------------------
// Scripted platform
// ---------------------------------------------------------------------------

/// A recorded trade offer: (sender username, asset ids, partner id64).
type SentOffer = (String, Vec<u64>, u64);

#[derive(Default)]
struct ScriptState {
    /// Remaining login failures per account.
    login_failures: HashMap<String, u32>,
    /// Total login attempts per account.
    login_counts: HashMap<String, u32>,
    sent_offers: Vec<SentOffer>,
    accepted_offers: Vec<u64>,
}

/// Deterministic in-memory platform. Inventories and wallets are fixed up
/// front; failures are injected per account.
struct ScriptedFactory {
    inventories: HashMap<String, Vec<Item>>,
    wallets: HashMap<String, f64>,
    state: Arc<Mutex<ScriptState>>,
    next_offer: Arc<AtomicU64>,
}

impl ScriptedFactory {
    fn new() -> Self {
        Self {
            inventories: HashMap::new(),
            wallets: HashMap::new(),
            state: Arc::new(Mutex::new(ScriptState::default())),
            next_offer: Arc::new(AtomicU64::new(1)),
        }
    }

    fn with_inventory(mut self, username: &str, items: Vec<Item>) -> Self {
        self.inventories.insert(username.to_string(), items);
        self
    }

    fn with_wallet(mut self, username: &str, total: f64) -> Self {
        self.wallets.insert(username.to_string(), total);
        self
    }

    /// Fail the next `count` logins for an account.
    fn with_login_failures(self, username: &str, count: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .login_failures
            .insert(username.to_string(), count);
        self
    }

    fn state(&self) -> Arc<Mutex<ScriptState>> {
        Arc::clone(&self.state)
    }
}

fn id64(username: &str) -> u64 {
    76_561_198_000_000_000 + username.bytes().map(u64::from).sum::<u64>()
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn login(&self, account: &Account) -> Result<Box<dyn PlatformSession>> {
        {
            let mut state = self.state.lock().unwrap();
            *state
                .login_counts
                .entry(account.username.clone())
                .or_insert(0) += 1;
            if let Some(remaining) = state.login_failures.get_mut(&account.username) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("scripted login failure for {}", account.username);
                }
            }
        }
        Ok(Box::new(ScriptedSession {
            username: account.username.clone(),
            items: self
                .inventories
                .get(&account.username)
                .cloned()
                .unwrap_or_default(),
            wallet: self.wallets.get(&account.username).copied().unwrap_or(0.0),
            state: Arc::clone(&self.state),
            next_offer: Arc::clone(&self.next_offer),
        }))
    }
}

struct ScriptedSession {
    username: String,
    items: Vec<Item>,
    wallet: f64,
    state: Arc<Mutex<ScriptState>>,
    next_offer: Arc<AtomicU64>,
}

#[async_trait]
impl PlatformSession for ScriptedSession {
    fn steam_id64(&self) -> u64 {
        id64(&self.username)
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
            total: self.wallet,
            currency_code: Some(1),
        })
    }

    async fn fetch_trade_token(&self) -> Result<String> {
        Ok(format!("TOKEN-{}", self.username))
    }

    async fn send_trade_offer(
        &self,
        items: &[Item],
        partner_steam_id64: u64,
        _partner_token: &str,
    ) -> Result<u64> {
        let offer_id = self.next_offer.fetch_add(1, Ordering::Relaxed);
        self.state.lock().unwrap().sent_offers.push((
            self.username.clone(),
            items.iter().map(|item| item.asset_id).collect(),
            partner_steam_id64,
        ));
        Ok(offer_id)
    }

    async fn accept_trade_offer(&self, offer_id: u64, _partner_steam_id64: u64) -> Result<()> {
        self.state.lock().unwrap().accepted_offers.push(offer_id);
        Ok(())
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Scripted pricing
// ---------------------------------------------------------------------------

struct StaticPrices {
    table: HashMap<String, f64>,
}

#[async_trait]
impl PriceSource for StaticPrices {
    async fn fetch_price_dictionary(&self, _game: Game) -> Result<HashMap<String, f64>> {
        Ok(self.table.clone())
    }

    async fn fetch_currency_rates(&self) -> Result<HashMap<u32, f64>> {
        Ok(HashMap::new())
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

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

fn proxy(host: &str) -> Proxy {
    Proxy {
        host: host.to_string(),
        port: 8080,
        username: "u".to_string(),
        password: "p".to_string(),
    }
}

fn item(asset_id: u64, name: &str) -> Item {
    Item {
        market_hash_name: name.to_string(),
        app_id: 730,
        context_id: 2,
        asset_id,
        class_id: asset_id + 9000,
        amount: 1,
    }
}

fn config(target: f64, attempts: u32) -> AppConfig {
    AppConfig {
        program: ProgramConfig {
            trade_attempts: attempts,
            trade_delay_secs: 1,
        },
        trade: TradeConfig {
            app_id: 730,
            context_id: 2,
            target,
            overfill: 1.0,
            count_acceptor_inventory: true,
            count_acceptor_wallet: true,
            items_whitelist: None,
            items_blacklist: None,
        },
        pricing: PricingConfig {
            url: "http://pricing.test".to_string(),
            token_env: None,
        },
    }
}

struct Harness {
    orchestrator: Orchestrator,
    proxies: ProxyPool,
    state: Arc<Mutex<ScriptState>>,
    results_dir: PathBuf,
}

fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("courier_e2e_{prefix}_{}", uuid::Uuid::new_v4()));
    dir
}

fn build_harness(
    cfg: AppConfig,
    factory: ScriptedFactory,
    prices: &[(&str, f64)],
    senders: Vec<Account>,
    acceptors: Vec<Account>,
) -> Harness {
    let state = factory.state();
    let proxies = ProxyPool::new(vec![proxy("a"), proxy("b")]);

    let data_dir = temp_dir("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let pending: String = acceptors
        .iter()
        .map(|a| format!("{}:pw\n", a.username))
        .collect();
    std::fs::write(data_dir.join("acceptors.txt"), pending).unwrap();

    let results_dir = temp_dir("results");
    let results = ResultsTracker::new(
        acceptors.len(),
        AccountStore::new(&data_dir),
        &results_dir,
    )
    .unwrap();

    let gateway = PlatformGateway::new(Box::new(factory), CredentialCache::in_memory());
    let pricing = StaticPrices {
        table: prices
            .iter()
            .map(|(name, price)| (name.to_string(), *price))
            .collect(),
    };
    let planner = TradePlanner::new(Optimizer::new(cfg.trade.overfill));

    let orchestrator = Orchestrator::new(
        cfg,
        senders,
        acceptors,
        gateway,
        Box::new(pricing),
        planner,
        proxies.clone(),
        results,
    );

    Harness {
        orchestrator,
        proxies,
        state,
        results_dir,
    }
}

fn read_outcomes(dir: &PathBuf, kind: &str) -> Vec<String> {
    std::fs::read_to_string(dir.join(format!("{kind}.txt")))
        .map(|contents| contents.lines().map(String::from).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

// Quoted price 10.00 nets 8.70 at the default 13% fee.
const QUOTE: f64 = 10.0;
const NET: f64 = 8.70;

#[tokio::test(start_paused = true)]
async fn distributes_to_multiple_acceptors_and_depletes_pool() {
    let factory = ScriptedFactory::new().with_inventory(
        "warehouse",
        vec![item(1, "Crate"), item(2, "Crate"), item(3, "Pin")],
    );
    let mut harness = build_harness(
        config(NET - 0.2, 3),
        factory,
        &[("Crate", QUOTE), ("Pin", 1.0)],
        vec![account("warehouse")],
        vec![account("buyer1"), account("buyer2")],
    );

    harness.orchestrator.execute().await.unwrap();

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.success, 2);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.resolved, 2);

    let state = harness.state.lock().unwrap();
    assert_eq!(state.sent_offers.len(), 2);
    assert_eq!(state.accepted_offers.len(), 2);

    // Depletion is sticky: the two transfers moved distinct items.
    let (_, first_assets, first_partner) = &state.sent_offers[0];
    let (_, second_assets, second_partner) = &state.sent_offers[1];
    assert_eq!(first_assets.len(), 1);
    assert_eq!(second_assets.len(), 1);
    assert_ne!(first_assets[0], second_assets[0]);
    assert_eq!(*first_partner, id64("buyer1"));
    assert_eq!(*second_partner, id64("buyer2"));
    drop(state);

    // Only the Pin is left: 1.00 quoted, 0.87 net.
    assert!((harness.orchestrator.stats().balance - 0.87).abs() < 1e-10);

    assert_eq!(
        read_outcomes(&harness.results_dir, "success"),
        vec!["buyer1:pw", "buyer2:pw"]
    );
    assert!(read_outcomes(&harness.results_dir, "error").is_empty());

    // Every borrowed proxy was returned.
    assert_eq!(harness.proxies.available(), harness.proxies.size());
}

#[tokio::test(start_paused = true)]
async fn acceptor_already_at_target_gets_no_transfer() {
    let factory = ScriptedFactory::new()
        .with_inventory("warehouse", vec![item(1, "Crate")])
        .with_inventory("rich", vec![item(50, "Crate"), item(51, "Crate")])
        .with_wallet("rich", 3.0);
    let mut harness = build_harness(
        config(15.0, 3),
        factory,
        &[("Crate", QUOTE)],
        vec![account("warehouse")],
        vec![account("rich")],
    );

    harness.orchestrator.execute().await.unwrap();

    // 2 × 8.70 inventory + 3.00 wallet ≥ 15.00: success without a trade.
    let stats = harness.orchestrator.stats();
    assert_eq!(stats.success, 1);
    assert!(harness.state.lock().unwrap().sent_offers.is_empty());

    // The sender pool is untouched.
    assert!((stats.balance - NET).abs() < 1e-10);
}

#[tokio::test(start_paused = true)]
async fn insufficient_supply_fails_immediately_without_retry() {
    let factory = ScriptedFactory::new().with_inventory("warehouse", vec![item(1, "Crate")]);
    let mut harness = build_harness(
        config(100.0, 5),
        factory,
        &[("Crate", QUOTE)],
        vec![account("warehouse")],
        vec![account("buyer1")],
    );

    harness.orchestrator.execute().await.unwrap();

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.success, 0);

    // No retry was consumed: the acceptor logged in exactly once.
    let state = harness.state.lock().unwrap();
    assert_eq!(state.login_counts["buyer1"], 1);
    assert!(state.sent_offers.is_empty());
    drop(state);

    let errors = read_outcomes(&harness.results_dir, "error");
    assert_eq!(errors, vec!["buyer1:pw"]);
    assert_eq!(harness.proxies.available(), harness.proxies.size());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_consume_the_attempt_budget() {
    let factory = ScriptedFactory::new()
        .with_inventory("warehouse", vec![item(1, "Crate")])
        .with_login_failures("flaky", 10);
    let mut harness = build_harness(
        config(5.0, 3),
        factory,
        &[("Crate", QUOTE)],
        vec![account("warehouse")],
        vec![account("flaky")],
    );

    harness.orchestrator.execute().await.unwrap();

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.success, 0);

    // One login attempt per configured attempt, each on a fresh session.
    assert_eq!(harness.state.lock().unwrap().login_counts["flaky"], 3);
    assert_eq!(harness.proxies.available(), harness.proxies.size());
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_after_transient_failure() {
    let factory = ScriptedFactory::new()
        .with_inventory("warehouse", vec![item(1, "Crate")])
        .with_login_failures("buyer1", 1);
    let mut harness = build_harness(
        config(NET - 0.2, 3),
        factory,
        &[("Crate", QUOTE)],
        vec![account("warehouse")],
        vec![account("buyer1")],
    );

    harness.orchestrator.execute().await.unwrap();

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.success, 1);
    assert_eq!(stats.errors, 0);

    let state = harness.state.lock().unwrap();
    assert_eq!(state.login_counts["buyer1"], 2);
    assert_eq!(state.sent_offers.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn preparation_failure_aborts_the_run() {
    // The lone sender cannot log in: preparation fails, nothing is
    // distributed, and no acceptor is resolved.
    let factory = ScriptedFactory::new().with_login_failures("warehouse", 10);
    let mut harness = build_harness(
        config(5.0, 3),
        factory,
        &[("Crate", QUOTE)],
        vec![account("warehouse")],
        vec![account("buyer1")],
    );

    let result = harness.orchestrator.execute().await;
    assert!(result.is_err());

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.resolved, 0);
    assert!(read_outcomes(&harness.results_dir, "error").is_empty());
    assert!(harness.state.lock().unwrap().sent_offers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn balance_is_nonincreasing_across_the_run() {
    let factory = ScriptedFactory::new().with_inventory(
        "warehouse",
        vec![item(1, "Crate"), item(2, "Crate"), item(3, "Crate")],
    );
    let mut harness = build_harness(
        config(NET - 0.2, 3),
        factory,
        &[("Crate", QUOTE)],
        vec![account("warehouse")],
        vec![account("buyer1"), account("buyer2"), account("buyer3")],
    );

    harness.orchestrator.execute().await.unwrap();

    // Three transfers of one 8.70 item each; the pool ends empty.
    let stats = harness.orchestrator.stats();
    assert_eq!(stats.success, 3);
    assert_eq!(stats.balance, 0.0);
}
