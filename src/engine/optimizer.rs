//! Subset-sum item selection.
//!
//! Given a monetary target and a list of priced items, finds the cheapest
//! admissible subset: the smallest reachable total at or above the target
//! within the overfill bound, using the fewest items among combinations
//! reaching that total. All arithmetic runs in integer cents.

use tracing::debug;

use crate::types::{cents_to_amount, to_cents, PricedItem, Selection};

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

// Lexicographic preference encoded as one score: overshoot dominates item
// count, item count dominates total. Totals are cent-quantized, so the
// weight gaps keep each criterion strictly dominant.
const OVERSHOOT_WEIGHT: f64 = 1e6;
const COUNT_WEIGHT: f64 = 1e3;

fn score(selection: &Selection, target: f64) -> f64 {
    let overshoot = (selection.total - target).max(0.0);
    -overshoot * OVERSHOOT_WEIGHT - selection.item_count as f64 * COUNT_WEIGHT - selection.total
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// Subset-sum optimizer with a fixed overfill allowance.
#[derive(Debug, Clone)]
pub struct Optimizer {
    overfill: f64,
}

impl Optimizer {
    pub fn new(overfill: f64) -> Self {
        Self { overfill }
    }

    /// Find a minimum-cardinality subset whose net value lands in
    /// `[target, target + overfill]`. Returns `None` when no achievable
    /// sum lies in that range.
    ///
    /// Deterministic for a fixed item order: a later combination never
    /// replaces an earlier one of equal item count.
    pub fn find_optimal_subset(&self, items: &[PricedItem], target: f64) -> Option<Selection> {
        if items.is_empty() {
            return None;
        }

        let prices: Vec<i64> = items.iter().map(PricedItem::net_cents).collect();
        let target_cents = to_cents(target);
        let over_cents = to_cents(self.overfill);
        let total_cents: i64 = prices.iter().sum();
        let capacity = total_cents.min(target_cents + over_cents);
        let cap = capacity as usize;

        // 0/1 subset-sum over [0, cap]: for each reachable sum, the minimum
        // item count and one backpointer (previous sum, item index) that
        // achieves it.
        let mut reachable = vec![false; cap + 1];
        let mut min_count = vec![u32::MAX; cap + 1];
        let mut parent: Vec<Option<(usize, usize)>> = vec![None; cap + 1];
        reachable[0] = true;
        min_count[0] = 0;

        for (idx, &price) in prices.iter().enumerate() {
            // Items beyond capacity cannot join any feasible combination.
            if price <= 0 || price > capacity {
                continue;
            }
            let price = price as usize;
            // High-to-low so an item is used at most once.
            for sum in (price..=cap).rev() {
                if !reachable[sum - price] {
                    continue;
                }
                let count = min_count[sum - price] + 1;
                if !reachable[sum] || count < min_count[sum] {
                    reachable[sum] = true;
                    min_count[sum] = count;
                    parent[sum] = Some((sum - price, idx));
                }
            }
        }

        // Smallest reachable sum at or above the target.
        let start = target_cents as usize;
        let winning = (start..=cap).find(|&sum| reachable[sum])?;

        let selected = reconstruct(&parent, winning, items);
        let selected_cents: i64 = selected.iter().map(|item| item.net_cents()).sum();

        debug!(
            target = format!("{target:.2}"),
            total = format!("{:.2}", cents_to_amount(selected_cents)),
            count = selected.len(),
            "Subset selected"
        );

        Some(Selection {
            total: cents_to_amount(selected_cents),
            item_count: selected.len(),
            items: selected,
        })
    }

    /// Run the subset optimizer against every sender and keep the best
    /// feasible result: minimum overshoot, then fewest items, then lowest
    /// total. Ties keep the earliest sender in iteration order.
    pub fn find_best_sender<'a, I>(&self, senders: I, target: f64) -> Option<(String, Selection)>
    where
        I: IntoIterator<Item = (&'a str, &'a [PricedItem])>,
    {
        let mut best: Option<(String, Selection, f64)> = None;

        for (name, items) in senders {
            let Some(selection) = self.find_optimal_subset(items, target) else {
                continue;
            };
            let candidate_score = score(&selection, target);
            let improves = match &best {
                None => true,
                Some((_, _, best_score)) => candidate_score > *best_score,
            };
            if improves {
                best = Some((name.to_string(), selection, candidate_score));
            }
        }

        best.map(|(name, selection, _)| (name, selection))
    }
}

/// Walk backpointers from the winning sum down to zero, then restore the
/// original input order.
fn reconstruct(
    parent: &[Option<(usize, usize)>],
    winning: usize,
    items: &[PricedItem],
) -> Vec<PricedItem> {
    let mut indices = Vec::new();
    let mut current = winning;
    while current != 0 {
        let Some((previous, idx)) = parent[current] else {
            break;
        };
        indices.push(idx);
        current = previous;
    }
    indices.reverse();
    indices.into_iter().map(|idx| items[idx].clone()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
