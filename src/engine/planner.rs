//! Trade planning.
//!
//! Builds the per-sender item pools from raw inventories and the price
//! table, selects the best sender for a missing amount via the optimizer,
//! and depletes the pools after successful transfers. Each sender's priced
//! list and identity index live inside one [`SenderPool`] so the two views
//! cannot drift apart.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::optimizer::Optimizer;
use crate::pricing::USD_CURRENCY_CODE;
use crate::types::{cents_to_amount, to_cents, Item, ItemKey, PricedItem, Selection};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Planning-level failures. `InsufficientSupply` is terminal: retrying the
/// same acceptor cannot succeed until the pools are replenished, which
/// never happens within a run.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Not enough items to reach target ${target:.2}")]
    InsufficientSupply { target: f64 },
}

// ---------------------------------------------------------------------------
// Sender pools
// ---------------------------------------------------------------------------

/// One sender's selectable inventory: a value-sorted priced list plus an
/// identity index back to the original platform records. Both views are
/// mutated together, only through [`SenderPool::remove_used`].
#[derive(Debug, Clone, Default)]
pub struct SenderPool {
    priced: Vec<PricedItem>,
    originals: HashMap<ItemKey, Item>,
}

impl SenderPool {
    fn build(items: Vec<Item>, price_table: &HashMap<String, f64>) -> Self {
        let originals: HashMap<ItemKey, Item> =
            items.iter().map(|item| (item.key(), item.clone())).collect();

        let mut priced: Vec<PricedItem> = items
            .iter()
            .filter_map(|item| {
                let price = price_table.get(&item.market_hash_name).copied()?;
                (price > 0.0).then(|| PricedItem::from_item(item, price))
            })
            .collect();
        priced.sort_by(|a, b| b.price.total_cmp(&a.price));

        Self { priced, originals }
    }

    /// Items usable by the optimizer, sorted by price descending.
    pub fn priced(&self) -> &[PricedItem] {
        &self.priced
    }

    /// Map a selection back to the original platform records. Identities
    /// no longer present are skipped.
    pub fn to_original(&self, selection: &Selection) -> Vec<Item> {
        selection
            .items
            .iter()
            .filter_map(|item| self.originals.get(&item.key()).cloned())
            .collect()
    }

    /// Remove every consumed identity from both views.
    pub fn remove_used(&mut self, selection: &Selection) {
        let used: HashSet<ItemKey> = selection.keys().into_iter().collect();
        self.priced.retain(|item| !used.contains(&item.key()));
        for key in used {
            self.originals.remove(&key);
        }
    }

    /// Aggregate net value of the selectable items, in cents.
    pub fn net_cents(&self) -> i64 {
        self.priced.iter().map(PricedItem::net_cents).sum()
    }
}

/// All sender pools, keyed by sender name. Ordered so that optimizer
/// tie-breaks between senders stay deterministic.
#[derive(Debug, Clone, Default)]
pub struct SenderPools {
    pools: BTreeMap<String, SenderPool>,
}

impl SenderPools {
    pub fn get(&self, sender: &str) -> Option<&SenderPool> {
        self.pools.get(sender)
    }

    pub fn sender_count(&self) -> usize {
        self.pools.len()
    }

    /// Total selectable items across all senders.
    pub fn item_count(&self) -> usize {
        self.pools.values().map(|pool| pool.priced.len()).sum()
    }

    /// Aggregate net value across all senders, cent-rounded.
    pub fn balance(&self) -> f64 {
        cents_to_amount(self.pools.values().map(SenderPool::net_cents).sum())
    }

    fn iter_priced(&self) -> impl Iterator<Item = (&str, &[PricedItem])> {
        self.pools
            .iter()
            .map(|(name, pool)| (name.as_str(), pool.priced()))
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub struct TradePlanner {
    optimizer: Optimizer,
}

impl TradePlanner {
    pub fn new(optimizer: Optimizer) -> Self {
        Self { optimizer }
    }

    /// Build the per-sender pools: apply the name filters, join each item
    /// with its price quote, and drop items without a positive quote.
    /// Unpriced items stay in the sender's inventory, just out of reach of
    /// the optimizer.
    pub fn build_price_index(
        &self,
        inventories: Vec<(String, Vec<Item>)>,
        price_table: &HashMap<String, f64>,
        whitelist: Option<&[String]>,
        blacklist: Option<&[String]>,
    ) -> SenderPools {
        let mut pools = BTreeMap::new();

        for (sender, items) in inventories {
            let filtered = filter_items(items, whitelist, blacklist);
            let pool = SenderPool::build(filtered, price_table);
            debug!(
                sender = %sender,
                selectable = pool.priced.len(),
                "Sender pool built"
            );
            pools.insert(sender, pool);
        }

        SenderPools { pools }
    }

    /// Sum of net values, cent-rounded.
    pub fn estimate_value(&self, items: &[PricedItem]) -> f64 {
        cents_to_amount(items.iter().map(PricedItem::net_cents).sum())
    }

    /// Normalise a wallet balance to USD. Unknown currency codes yield 0
    /// rather than an error: missing exchange-rate data must not kill an
    /// attempt.
    pub fn wallet_to_usd(
        &self,
        wallet_total: f64,
        wallet_currency: Option<u32>,
        currency_rates: &HashMap<u32, f64>,
    ) -> f64 {
        let Some(currency) = wallet_currency else {
            return 0.0;
        };

        if currency == USD_CURRENCY_CODE {
            return cents_to_amount(to_cents(wallet_total));
        }

        match currency_rates.get(&currency) {
            Some(rate) => cents_to_amount(to_cents(wallet_total / rate)),
            None => {
                debug!(currency, "No currency rate, treating wallet as 0 USD");
                0.0
            }
        }
    }

    /// Pick the sender best able to cover `target`.
    pub fn select_best_sender(
        &self,
        pools: &SenderPools,
        target: f64,
    ) -> Result<(String, Selection), PlanError> {
        self.optimizer
            .find_best_sender(pools.iter_priced(), target)
            .ok_or(PlanError::InsufficientSupply { target })
    }

    /// Deplete a sender's pool after a successful transfer.
    pub fn remove_used(&self, pools: &mut SenderPools, sender: &str, selection: &Selection) {
        if let Some(pool) = pools.pools.get_mut(sender) {
            pool.remove_used(selection);
            debug!(
                sender = %sender,
                remaining = pool.priced.len(),
                "Sender pool depleted"
            );
        }
    }
}

/// Case-insensitive substring filters: whitelist keeps matches (when
/// given), blacklist then drops matches.
fn filter_items(
    items: Vec<Item>,
    whitelist: Option<&[String]>,
    blacklist: Option<&[String]>,
) -> Vec<Item> {
    let matches_any = |name: &str, needles: &[String]| {
        let name = name.to_lowercase();
        needles
            .iter()
            .any(|needle| name.contains(&needle.to_lowercase()))
    };

    items
        .into_iter()
        .filter(|item| match whitelist {
            Some(needles) if !needles.is_empty() => matches_any(&item.market_hash_name, needles),
            _ => true,
        })
        .filter(|item| match blacklist {
            Some(needles) if !needles.is_empty() => !matches_any(&item.market_hash_name, needles),
            _ => true,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
