//! Cross-strategy trade netting.
//!
//! Buys of the same identifier are combined into one account-level order.
//! Sells are never netted against buys from other strategies: each sell is
//! lot-specific and must execute as a sell to keep its tax character.

use std::collections::BTreeMap;

use rebalance_core::{Trade, TradeSide};

use crate::trades::round_quantity;

/// Strategy id carried by combined account-level buys.
pub const ACCOUNT_LEVEL_STRATEGY_ID: i64 = -1;

/// Net trades across strategies.
///
/// `trade_rounding` is the minimum rounding across participating
/// strategies, applied to the combined buy quantities. Output order is
/// buys by identifier ascending, then sells in input order.
pub fn net_trades(trades: &[Trade], trade_rounding: u32) -> Vec<Trade> {
    let mut buys: BTreeMap<String, Trade> = BTreeMap::new();
    let mut sells: Vec<Trade> = Vec::new();

    for trade in trades {
        match trade.side {
            TradeSide::Buy => {
                buys.entry(trade.identifier.clone())
                    .and_modify(|combined| {
                        combined.quantity += trade.quantity;
                        combined.transaction_cost += trade.transaction_cost;
                    })
                    .or_insert_with(|| Trade {
                        strategy_id: ACCOUNT_LEVEL_STRATEGY_ID,
                        ..trade.clone()
                    });
            }
            TradeSide::Sell => sells.push(trade.clone()),
        }
    }

    let mut netted: Vec<Trade> = buys
        .into_values()
        .map(|mut trade| {
            trade.quantity = round_quantity(trade.quantity, trade_rounding);
            trade
        })
        .filter(|trade| trade.quantity > 0.0)
        .collect();
    netted.extend(sells);
    netted
}
