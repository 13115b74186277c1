//! Distribution orchestrator.
//!
//! Drives the whole run: concurrent preparation (sender inventories, then
//! pricing data), strictly sequential distribution (one acceptor state
//! machine at a time — acceptors share and mutate the single sender pool),
//! and unconditional session teardown.
//!
//! Each acceptor runs the machine Evaluate → Select → Transfer → Success,
//! with Exhausted as the terminal failure state once the attempt budget is
//! spent. Every attempt checks out a proxy from the shared pool, binds it
//! to a fresh session, and returns it on every exit path.

use anyhow::{Context, Result};
use futures::future;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::planner::{PlanError, SenderPools, TradePlanner};
use super::results::ResultsTracker;
use crate::config::AppConfig;
use crate::platform::gateway::PlatformGateway;
use crate::pricing::{Game, PriceSource};
use crate::proxy::ProxyPool;
use crate::types::{Account, PricedItem, Proxy, Selection};

/// Cooldown between attempts for one acceptor.
const ATTEMPT_COOLDOWN: Duration = Duration::from_secs(20);

const EXHAUSTED_MESSAGE: &str = "Unable to process trade offer";

// ---------------------------------------------------------------------------
// State machine types
// ---------------------------------------------------------------------------

/// States of one attempt. The terminal `Exhausted` state of the acceptor
/// machine lives in [`Resolution`], produced when the attempt budget runs
/// out.
enum AcceptorState {
    Evaluate,
    Select { missing: f64 },
    Transfer { sender: String, selection: Selection },
    Success { transferred: Option<(String, Selection)> },
}

/// How a single attempt ended.
enum AttemptOutcome {
    /// The acceptor already holds the target amount; nothing to move.
    AlreadyFunded,
    /// Items were transferred and the offer was accepted.
    Transferred { sender: String, selection: Selection },
}

/// Why a single attempt failed.
///
/// Everything except `InsufficientSupply` is retried uniformly — timeouts,
/// malformed responses and platform-side rejections alike. Ban-type
/// failures arguably deserve to fail fast; until the platform collaborator
/// classifies them, they consume attempts like any other fault.
pub(crate) enum AttemptError {
    /// Terminal: no sender can cover the missing amount. Retrying cannot
    /// help because pools only shrink.
    InsufficientSupply(PlanError),
    /// Retry with a fresh proxy and session.
    Transient(anyhow::Error),
}

impl From<anyhow::Error> for AttemptError {
    fn from(err: anyhow::Error) -> Self {
        AttemptError::Transient(err)
    }
}

/// Final resolution of one acceptor.
enum Resolution {
    /// Target reached, either immediately or after a transfer.
    Funded { transferred: Option<(String, Selection)> },
    /// The pools cannot cover the acceptor; recorded without retry.
    OutOfSupply { message: String },
    /// Attempt budget spent on transient failures.
    Exhausted,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: AppConfig,
    senders: Vec<Account>,
    senders_by_name: HashMap<String, Account>,
    acceptors: Vec<Account>,
    gateway: PlatformGateway,
    pricing: Box<dyn PriceSource>,
    planner: TradePlanner,
    proxies: ProxyPool,
    results: ResultsTracker,
    pools: SenderPools,
    price_table: HashMap<String, f64>,
    currency_rates: HashMap<u32, f64>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        senders: Vec<Account>,
        acceptors: Vec<Account>,
        gateway: PlatformGateway,
        pricing: Box<dyn PriceSource>,
        planner: TradePlanner,
        proxies: ProxyPool,
        results: ResultsTracker,
    ) -> Self {
        let senders_by_name = senders
            .iter()
            .map(|sender| (sender.username.clone(), sender.clone()))
            .collect();
        Self {
            config,
            senders,
            senders_by_name,
            acceptors,
            gateway,
            pricing,
            planner,
            proxies,
            results,
            pools: SenderPools::default(),
            price_table: HashMap::new(),
            currency_rates: HashMap::new(),
        }
    }

    /// Run the full distribution: prepare, process every acceptor, tear
    /// down all sessions. Teardown runs regardless of how the run ended.
    pub async fn execute(&mut self) -> Result<()> {
        let result = self.run_distribution().await;
        self.shutdown().await;
        result
    }

    /// Close every remaining open session. Idempotent.
    pub async fn shutdown(&self) {
        self.gateway.close_all().await;
    }

    async fn run_distribution(&mut self) -> Result<()> {
        self.prepare().await?;

        let acceptors = std::mem::take(&mut self.acceptors);
        let delay = Duration::from_secs(self.config.program.trade_delay_secs);

        for acceptor in &acceptors {
            self.process_acceptor(acceptor).await?;
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }

    // -- Preparation -----------------------------------------------------

    /// Fetch all sender inventories concurrently, then the pricing data
    /// sequentially, and build the sender pools. Any failure here aborts
    /// the run: distribution never proceeds without price data.
    async fn prepare(&mut self) -> Result<()> {
        info!(
            senders = self.senders.len(),
            acceptors = self.acceptors.len(),
            "Preparing data"
        );

        let app_id = self.config.trade.app_id;
        let context_id = self.config.trade.context_id;

        debug!("Checking sender inventories");
        let gateway = &self.gateway;
        let fetches = self.senders.iter().map(|sender| async move {
            let items = gateway.fetch_inventory(sender, app_id, context_id).await?;
            debug!(account = %sender, count = items.len(), "Items available");
            Ok::<_, anyhow::Error>((sender.username.clone(), items))
        });
        let inventories = future::try_join_all(fetches)
            .await
            .context("Sender inventory preparation failed")?;
        debug!("All inventories checked");

        let game = Game::from_app_id(app_id)
            .with_context(|| format!("No pricing support for app {app_id}"))?;

        debug!("Getting current market prices");
        self.price_table = self
            .pricing
            .fetch_price_dictionary(game)
            .await
            .context("Price dictionary fetch failed")?;
        info!(count = self.price_table.len(), "Market prices received");

        debug!("Getting currency exchange rates");
        self.currency_rates = self
            .pricing
            .fetch_currency_rates()
            .await
            .context("Currency rate fetch failed")?;
        debug!(count = self.currency_rates.len(), "Exchange rates received");

        self.pools = self.planner.build_price_index(
            inventories,
            &self.price_table,
            self.config.trade.items_whitelist.as_deref(),
            self.config.trade.items_blacklist.as_deref(),
        );
        info!(
            items = self.pools.item_count(),
            senders = self.pools.sender_count(),
            "Ready to distribute"
        );
        self.results.update_balance(&self.pools);

        // No pricing calls happen after preparation.
        self.pricing.close().await;
        Ok(())
    }

    // -- Distribution ----------------------------------------------------

    async fn process_acceptor(&mut self, acceptor: &Account) -> Result<()> {
        let resolution = self.drive_acceptor(acceptor).await;

        // The acceptor's last session stays bound to its last proxy;
        // tear it down no matter how the machine exited.
        self.gateway.close_session(acceptor).await;

        match resolution? {
            Resolution::Funded { transferred } => {
                self.results.record_success(acceptor)?;
                if let Some((sender, selection)) = transferred {
                    self.planner.remove_used(&mut self.pools, &sender, &selection);
                    self.results.update_balance(&self.pools);
                }
            }
            Resolution::OutOfSupply { message } => {
                self.results.record_error(acceptor, &message)?;
            }
            Resolution::Exhausted => {
                self.results.record_error(acceptor, EXHAUSTED_MESSAGE)?;
            }
        }
        Ok(())
    }

    /// The per-acceptor retry loop around single attempts.
    async fn drive_acceptor(&mut self, acceptor: &Account) -> Result<Resolution> {
        let mut attempts = self.config.program.trade_attempts;

        loop {
            let lease = self.proxies.acquire().await?;
            let outcome = self.run_attempt(acceptor, lease.proxy().clone()).await;
            // Return the proxy before any cooldown so other flows could
            // use it; the next attempt checks out a fresh one.
            drop(lease);

            match outcome {
                Ok(AttemptOutcome::AlreadyFunded) => {
                    return Ok(Resolution::Funded { transferred: None });
                }
                Ok(AttemptOutcome::Transferred { sender, selection }) => {
                    return Ok(Resolution::Funded {
                        transferred: Some((sender, selection)),
                    });
                }
                Err(AttemptError::InsufficientSupply(err)) => {
                    return Ok(Resolution::OutOfSupply {
                        message: err.to_string(),
                    });
                }
                Err(AttemptError::Transient(err)) => {
                    attempts -= 1;
                    if attempts == 0 {
                        warn!(account = %acceptor, error = %err, "Attempt budget exhausted");
                        return Ok(Resolution::Exhausted);
                    }
                    warn!(
                        account = %acceptor,
                        error = %err,
                        attempts_left = attempts,
                        "Attempt failed — retrying"
                    );
                    tokio::time::sleep(ATTEMPT_COOLDOWN).await;
                }
            }
        }
    }

    /// One attempt: Evaluate → Select → Transfer → Success, on a fresh
    /// session bound to this attempt's proxy.
    async fn run_attempt(
        &mut self,
        acceptor: &Account,
        proxy: Proxy,
    ) -> Result<AttemptOutcome, AttemptError> {
        let mut acceptor = acceptor.clone();
        acceptor.proxy = Some(proxy);
        // Session and proxy are bound 1:1 and rotate together.
        self.gateway.close_session(&acceptor).await;

        let target = self.config.trade.target;
        let mut state = AcceptorState::Evaluate;

        loop {
            state = match state {
                AcceptorState::Evaluate => {
                    let current = self.evaluate(&acceptor).await?;
                    if current >= target {
                        info!(
                            account = %acceptor,
                            target = format!("${target:.2}"),
                            "Already holds the target amount"
                        );
                        AcceptorState::Success { transferred: None }
                    } else {
                        AcceptorState::Select {
                            missing: target - current,
                        }
                    }
                }

                AcceptorState::Select { missing } => {
                    let (sender, selection) = self
                        .planner
                        .select_best_sender(&self.pools, missing)
                        .map_err(AttemptError::InsufficientSupply)?;
                    info!(
                        account = %acceptor,
                        sender = %sender,
                        selection = %selection,
                        "Sender selected"
                    );
                    AcceptorState::Transfer { sender, selection }
                }

                AcceptorState::Transfer { sender, selection } => {
                    self.transfer(&acceptor, &sender, &selection).await?;
                    AcceptorState::Success {
                        transferred: Some((sender, selection)),
                    }
                }

                AcceptorState::Success { transferred } => {
                    return Ok(match transferred {
                        None => AttemptOutcome::AlreadyFunded,
                        Some((sender, selection)) => AttemptOutcome::Transferred {
                            sender,
                            selection,
                        },
                    });
                }
            };
        }
    }

    /// Current value held by the acceptor: priced inventory plus wallet,
    /// each only when enabled in config.
    async fn evaluate(&self, acceptor: &Account) -> Result<f64> {
        let trade = &self.config.trade;
        let (items, wallet) = self
            .gateway
            .fetch_inventory_and_wallet(acceptor, trade.app_id, trade.context_id)
            .await?;

        let inventory_value = if trade.count_acceptor_inventory {
            let priced: Vec<PricedItem> = items
                .iter()
                .filter_map(|item| {
                    let price = self.price_table.get(&item.market_hash_name).copied()?;
                    (price > 0.0).then(|| PricedItem::from_item(item, price))
                })
                .collect();
            self.planner.estimate_value(&priced)
        } else {
            0.0
        };

        let wallet_usd = if trade.count_acceptor_wallet {
            self.planner
                .wallet_to_usd(wallet.total, wallet.currency_code, &self.currency_rates)
        } else {
            0.0
        };

        let current = inventory_value + wallet_usd;
        debug!(
            account = %acceptor,
            inventory = format!("{inventory_value:.2}"),
            wallet = format!("{wallet_usd:.2}"),
            current = format!("{current:.2}"),
            target = format!("{:.2}", trade.target),
            "Acceptor evaluated"
        );
        Ok(current)
    }

    /// Reconstruct the original items, resolve trade credentials, send the
    /// offer from the sender and accept it from the acceptor.
    async fn transfer(
        &self,
        acceptor: &Account,
        sender: &str,
        selection: &Selection,
    ) -> Result<(), AttemptError> {
        let sender_account = self
            .senders_by_name
            .get(sender)
            .cloned()
            .ok_or_else(|| AttemptError::Transient(anyhow::anyhow!("Unknown sender {sender}")))?;

        let items = self
            .pools
            .get(sender)
            .map(|pool| pool.to_original(selection))
            .unwrap_or_default();

        let credentials = self.gateway.get_trade_credentials(acceptor).await?;
        let offer_id = self
            .gateway
            .send_trade_offer(&sender_account, &items, credentials.steam_id64, &credentials.token)
            .await?;
        info!(account = %acceptor, offer_id, "Trade offer sent successfully");

        self.gateway
            .accept_trade_offer(acceptor, offer_id, credentials.steam_id64)
            .await?;
        info!(account = %acceptor, offer_id, "Trade offer accepted successfully");
        Ok(())
    }

    /// Progress snapshot, exposed for observability and tests.
    pub fn stats(&self) -> crate::types::ProgressStats {
        self.results.stats()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
