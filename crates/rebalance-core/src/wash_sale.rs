//! Wash-sale restriction derivation.
//!
//! Two tables are derived once per run from the account-wide lot book and
//! recently closed lots, then queried by every strategy:
//!
//! 1. Buy restrictions: identifiers sold at a loss within the window cannot
//!    be repurchased until the window expires.
//! 2. Sell restrictions: a lot cannot be sold at a loss while another lot of
//!    the same identifier was purchased within the window, since the recent
//!    purchase would convert the loss into a wash sale.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::types::{ClosedLot, Prices, TaxLot};

/// Default wash-sale window in days (before and after, inclusive).
pub const DEFAULT_WASH_WINDOW_DAYS: i64 = 30;

/// Relative tolerance applied to the cost basis so that break-even lots
/// count as wash-triggering.
const BREAK_EVEN_TOLERANCE: f64 = 1e-7;

/// Why a restriction exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WashSaleReason {
    /// Bought, sold at a loss, buying again would wash the loss.
    BuySellBuy,
    /// Bought, bought more, selling the older lot at a loss would wash it.
    BuyBuySell,
}

/// Identifier-level restriction on buying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashSaleBuyRestriction {
    pub identifier: String,
    pub reason: WashSaleReason,
    /// Date after which the restriction ends (exclusive).
    pub restriction_ends_after: NaiveDate,
}

/// Lot-level restriction on selling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashSaleSellRestriction {
    pub lot_id: String,
    pub identifier: String,
    pub reason: WashSaleReason,
    pub restriction_ends_after: NaiveDate,
    pub current_price: f64,
    /// Current value shaved by the inadvertent-wash protection buffer.
    pub adjusted_current_value: f64,
}

/// Derived wash-sale restrictions, valid as of `current_date`.
#[derive(Debug, Clone)]
pub struct WashSaleRestrictions {
    current_date: NaiveDate,
    buy_restrictions: Vec<WashSaleBuyRestriction>,
    sell_restrictions: Vec<WashSaleSellRestriction>,
}

impl WashSaleRestrictions {
    /// Derive both restriction tables.
    ///
    /// `all_lots` must span every strategy in the account: a purchase in one
    /// strategy can wash a loss realized in another.
    pub fn derive(
        current_date: NaiveDate,
        all_lots: &[TaxLot],
        prices: &Prices,
        recently_closed_lots: &[ClosedLot],
        window_days: i64,
        inadvertent_wash_protection: f64,
    ) -> Self {
        let buy_restrictions =
            derive_buy_restrictions(current_date, recently_closed_lots, window_days);
        let sell_restrictions = derive_sell_restrictions(
            current_date,
            all_lots,
            prices,
            window_days,
            inadvertent_wash_protection,
        );

        debug!(
            buy_restricted = buy_restrictions.len(),
            sell_restricted = sell_restrictions.len(),
            "derived wash-sale restrictions"
        );

        Self {
            current_date,
            buy_restrictions,
            sell_restrictions,
        }
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    pub fn is_buy_restricted(&self, identifier: &str) -> bool {
        self.buy_restrictions
            .iter()
            .any(|r| r.identifier == identifier)
    }

    pub fn is_lot_sell_restricted(&self, identifier: &str, lot_id: &str) -> bool {
        self.sell_restrictions
            .iter()
            .any(|r| r.identifier == identifier && r.lot_id == lot_id)
    }

    pub fn active_buy_restrictions(&self) -> &[WashSaleBuyRestriction] {
        &self.buy_restrictions
    }

    pub fn active_sell_restrictions(&self) -> &[WashSaleSellRestriction] {
        &self.sell_restrictions
    }

    pub fn restricted_lots_for(&self, identifier: &str) -> Vec<&WashSaleSellRestriction> {
        self.sell_restrictions
            .iter()
            .filter(|r| r.identifier == identifier)
            .collect()
    }

    /// Identifiers with any active restriction, buy or sell.
    pub fn restricted_identifiers(&self) -> BTreeSet<String> {
        self.buy_restrictions
            .iter()
            .map(|r| r.identifier.clone())
            .chain(self.sell_restrictions.iter().map(|r| r.identifier.clone()))
            .collect()
    }
}

/// Loss sales inside the window forbid repurchase. One row per identifier,
/// keeping the furthest expiry; ordered identifier-descending.
fn derive_buy_restrictions(
    current_date: NaiveDate,
    closed_lots: &[ClosedLot],
    window_days: i64,
) -> Vec<WashSaleBuyRestriction> {
    let mut max_expiry: HashMap<&str, NaiveDate> = HashMap::new();

    for lot in closed_lots {
        if lot.realized_gain >= 0.0 {
            continue;
        }
        let ends_after = lot.date_sold + Duration::days(window_days);
        if ends_after <= current_date {
            continue;
        }
        max_expiry
            .entry(lot.identifier.as_str())
            .and_modify(|d| {
                if ends_after > *d {
                    *d = ends_after;
                }
            })
            .or_insert(ends_after);
    }

    let mut restrictions: Vec<WashSaleBuyRestriction> = max_expiry
        .into_iter()
        .map(|(identifier, ends_after)| WashSaleBuyRestriction {
            identifier: identifier.to_string(),
            reason: WashSaleReason::BuySellBuy,
            restriction_ends_after: ends_after,
        })
        .collect();

    restrictions.sort_by(|a, b| b.identifier.cmp(&a.identifier));
    restrictions
}

/// A lot is sell-restricted while another lot of the same identifier was
/// acquired within the window and selling the lot would realize a loss.
/// Ordered identifier-descending then lot-id-descending.
fn derive_sell_restrictions(
    current_date: NaiveDate,
    all_lots: &[TaxLot],
    prices: &Prices,
    window_days: i64,
    inadvertent_wash_protection: f64,
) -> Vec<WashSaleSellRestriction> {
    let window_start = current_date - Duration::days(window_days);

    // In-window purchases, grouped by identifier.
    let mut recent_by_identifier: HashMap<&str, Vec<&TaxLot>> = HashMap::new();
    for lot in all_lots {
        if lot.date_acquired >= window_start && lot.date_acquired <= current_date {
            recent_by_identifier
                .entry(lot.identifier.as_str())
                .or_default()
                .push(lot);
        }
    }

    let mut restrictions = Vec::new();

    for lot in all_lots {
        let Some(recent) = recent_by_identifier.get(lot.identifier.as_str()) else {
            continue;
        };
        // Latest in-window purchase that is not this lot itself.
        let latest_other = recent
            .iter()
            .filter(|r| r.lot_id != lot.lot_id)
            .map(|r| r.date_acquired)
            .max();
        let Some(latest_other) = latest_other else {
            continue;
        };

        let Some(price) = prices.get(&lot.identifier) else {
            continue;
        };
        let current_value = lot.quantity * price;
        let adjusted_current_value = current_value * (1.0 - inadvertent_wash_protection);

        // Only lots that would realize a loss (or break even, within
        // tolerance) can create a wash sale.
        if adjusted_current_value > lot.cost_basis * (1.0 + BREAK_EVEN_TOLERANCE) {
            continue;
        }

        restrictions.push(WashSaleSellRestriction {
            lot_id: lot.lot_id.clone(),
            identifier: lot.identifier.clone(),
            reason: WashSaleReason::BuyBuySell,
            restriction_ends_after: latest_other + Duration::days(window_days),
            current_price: price,
            adjusted_current_value,
        });
    }

    restrictions.sort_by(|a, b| {
        b.identifier
            .cmp(&a.identifier)
            .then_with(|| b.lot_id.cmp(&a.lot_id))
    });
    restrictions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lot(lot_id: &str, identifier: &str, qty: f64, cost: f64, acquired: NaiveDate) -> TaxLot {
        TaxLot {
            lot_id: lot_id.to_string(),
            identifier: identifier.to_string(),
            account_id: None,
            broker: None,
            quantity: qty,
            cost_basis: cost,
            date_acquired: acquired,
        }
    }

    fn prices_of(pairs: &[(&str, f64)]) -> Prices {
        let map: StdHashMap<String, f64> =
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Prices::new(map)
    }

    fn loss_sale(identifier: &str, sold: NaiveDate) -> ClosedLot {
        ClosedLot {
            identifier: identifier.to_string(),
            quantity: 10.0,
            cost_basis: 1000.0,
            date_acquired: sold - Duration::days(90),
            date_sold: sold,
            proceeds: 900.0,
            realized_gain: -100.0,
        }
    }

    #[test]
    fn loss_sale_restricts_buying() {
        let today = date(2025, 6, 15);
        let closed = vec![loss_sale("VOO", date(2025, 6, 13))];
        let ws = WashSaleRestrictions::derive(today, &[], &Prices::default(), &closed, 30, 0.003);

        assert!(ws.is_buy_restricted("VOO"));
        assert!(!ws.is_buy_restricted("BND"));
        assert_eq!(
            ws.active_buy_restrictions()[0].restriction_ends_after,
            date(2025, 7, 13)
        );
    }

    #[test]
    fn gain_sale_does_not_restrict_buying() {
        let today = date(2025, 6, 15);
        let mut closed = loss_sale("VOO", date(2025, 6, 13));
        closed.realized_gain = 50.0;
        let ws =
            WashSaleRestrictions::derive(today, &[], &Prices::default(), &[closed], 30, 0.003);
        assert!(!ws.is_buy_restricted("VOO"));
    }

    #[test]
    fn expired_restriction_dropped() {
        let today = date(2025, 6, 15);
        let closed = vec![loss_sale("VOO", date(2025, 5, 1))];
        let ws = WashSaleRestrictions::derive(today, &[], &Prices::default(), &closed, 30, 0.003);
        assert!(!ws.is_buy_restricted("VOO"));
    }

    #[test]
    fn max_expiry_wins_per_identifier() {
        let today = date(2025, 6, 15);
        let closed = vec![
            loss_sale("VOO", date(2025, 6, 1)),
            loss_sale("VOO", date(2025, 6, 10)),
        ];
        let ws = WashSaleRestrictions::derive(today, &[], &Prices::default(), &closed, 30, 0.003);
        assert_eq!(ws.active_buy_restrictions().len(), 1);
        assert_eq!(
            ws.active_buy_restrictions()[0].restriction_ends_after,
            date(2025, 7, 10)
        );
    }

    #[test]
    fn recent_purchase_restricts_losing_lot() {
        let today = date(2025, 6, 15);
        // Old lot underwater, plus a purchase 5 days ago.
        let lots = vec![
            lot("L1", "VOO", 10.0, 5000.0, date(2024, 1, 10)),
            lot("L2", "VOO", 5.0, 2000.0, date(2025, 6, 10)),
        ];
        let prices = prices_of(&[("VOO", 400.0)]); // L1 value 4000 < 5000 basis
        let ws = WashSaleRestrictions::derive(today, &lots, &prices, &[], 30, 0.003);

        assert!(ws.is_lot_sell_restricted("VOO", "L1"));
        let r = ws.restricted_lots_for("VOO");
        let l1 = r.iter().find(|r| r.lot_id == "L1").unwrap();
        assert_eq!(l1.restriction_ends_after, date(2025, 7, 10));
    }

    #[test]
    fn lot_in_gain_is_not_sell_restricted() {
        let today = date(2025, 6, 15);
        let lots = vec![
            lot("L1", "VOO", 10.0, 3000.0, date(2024, 1, 10)),
            lot("L2", "VOO", 5.0, 2000.0, date(2025, 6, 10)),
        ];
        let prices = prices_of(&[("VOO", 400.0)]); // L1 value 4000 > 3000 basis
        let ws = WashSaleRestrictions::derive(today, &lots, &prices, &[], 30, 0.003);
        assert!(!ws.is_lot_sell_restricted("VOO", "L1"));
    }

    #[test]
    fn break_even_lot_is_sell_restricted() {
        let today = date(2025, 6, 15);
        let lots = vec![
            lot("L1", "VOO", 10.0, 4000.0, date(2024, 1, 10)),
            lot("L2", "VOO", 5.0, 2000.0, date(2025, 6, 10)),
        ];
        // Exactly at cost basis; the protection buffer pulls the adjusted
        // value below basis, so the lot stays restricted.
        let prices = prices_of(&[("VOO", 400.0)]);
        let ws = WashSaleRestrictions::derive(today, &lots, &prices, &[], 30, 0.003);
        assert!(ws.is_lot_sell_restricted("VOO", "L1"));
    }

    #[test]
    fn lone_lot_is_not_sell_restricted() {
        let today = date(2025, 6, 15);
        // A single recent purchase cannot wash itself.
        let lots = vec![lot("L1", "VOO", 10.0, 5000.0, date(2025, 6, 10))];
        let prices = prices_of(&[("VOO", 400.0)]);
        let ws = WashSaleRestrictions::derive(today, &lots, &prices, &[], 30, 0.003);
        assert!(!ws.is_lot_sell_restricted("VOO", "L1"));
    }

    #[test]
    fn cross_strategy_lots_share_restrictions() {
        let today = date(2025, 6, 15);
        // L1 owned by one strategy, L2 purchased recently by another; the
        // derivation sees the merged book, so L1 is still restricted.
        let lots = vec![
            lot("L1", "VOO", 10.0, 5000.0, date(2024, 1, 10)),
            lot("L2", "VOO", 5.0, 2000.0, date(2025, 6, 12)),
        ];
        let prices = prices_of(&[("VOO", 400.0)]);
        let ws = WashSaleRestrictions::derive(today, &lots, &prices, &[], 30, 0.003);
        assert!(ws.is_lot_sell_restricted("VOO", "L1"));
        assert!(ws.restricted_identifiers().contains("VOO"));
    }

    #[test]
    fn buy_restrictions_sorted_identifier_descending() {
        let today = date(2025, 6, 15);
        let closed = vec![
            loss_sale("AAA", date(2025, 6, 10)),
            loss_sale("ZZZ", date(2025, 6, 10)),
            loss_sale("MMM", date(2025, 6, 10)),
        ];
        let ws = WashSaleRestrictions::derive(today, &[], &Prices::default(), &closed, 30, 0.003);
        let ids: Vec<&str> = ws
            .active_buy_restrictions()
            .iter()
            .map(|r| r.identifier.as_str())
            .collect();
        assert_eq!(ids, vec!["ZZZ", "MMM", "AAA"]);
    }
}
