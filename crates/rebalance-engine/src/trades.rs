//! Trade synthesis.
//!
//! Turns a solved variable assignment into lot-level trades. Quantities are
//! rounded here, once, to the strategy's `trade_rounding`; anything that
//! rounds to zero is dropped.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use rebalance_core::{Strategy, Trade, TradeSide};

use crate::objectives::is_tlh_sell;
use crate::settings::OptimizationSettings;
use crate::variables::ProgramVariables;

/// Round a share quantity to `decimals` places.
pub fn round_quantity(quantity: f64, decimals: u32) -> f64 {
    Decimal::from_f64(quantity)
        .map(|d| d.round_dp(decimals).to_f64().unwrap_or(0.0))
        .unwrap_or(0.0)
}

/// Build the trade list from solved variable values.
///
/// Buys come first in buy-variable order, then sells in lot order, which
/// keeps output deterministic for identical solves.
pub fn synthesize_trades(
    strategy: &Strategy,
    vars: &ProgramVariables,
    values: &[f64],
    settings: &OptimizationSettings,
) -> Vec<Trade> {
    let mut trades = Vec::new();

    for buy in &vars.buys {
        let quantity = round_quantity(values[buy.var.0], strategy.trade_rounding);
        if quantity <= 0.0 {
            continue;
        }
        trades.push(Trade {
            strategy_id: strategy.strategy_id,
            lot_id: None,
            identifier: buy.identifier.clone(),
            side: TradeSide::Buy,
            quantity,
            price: buy.price,
            realized_gain: None,
            gain_type: None,
            transaction_cost: quantity * buy.price * buy.spread,
            is_tlh: None,
        });
    }

    for sell in &vars.sells {
        let quantity = round_quantity(values[sell.var.0], strategy.trade_rounding);
        if quantity <= 0.0 {
            continue;
        }
        // Rounding must never oversell the lot.
        let quantity = quantity.min(sell.quantity);
        let unit_gain = sell.price - sell.unit_cost_basis;
        let realized_gain = quantity * unit_gain;
        trades.push(Trade {
            strategy_id: strategy.strategy_id,
            lot_id: Some(sell.lot_id.clone()),
            identifier: sell.identifier.clone(),
            side: TradeSide::Sell,
            quantity,
            price: sell.price,
            realized_gain: Some(realized_gain),
            gain_type: Some(sell.gain_type),
            transaction_cost: quantity * sell.price * sell.spread,
            is_tlh: Some(is_tlh_sell(
                unit_gain,
                sell.unit_cost_basis,
                sell.gain_type,
                settings,
            )),
        });
    }

    trades
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use milp_solver::Problem;
    use rebalance_core::{GainType, Prices, Spreads, StrategyKind, Target, TaxLot, TaxRates};
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_strategy() -> Strategy {
        let mut prices = HashMap::new();
        prices.insert("VOO".to_string(), 500.0);
        prices.insert("BND".to_string(), 100.0);
        let mut spreads = HashMap::new();
        spreads.insert("VOO".to_string(), 0.001);
        Strategy {
            strategy_id: 7,
            label: None,
            kind: StrategyKind::TaxAware,
            cash: 0.0,
            min_cash: 0.0,
            withdrawal_amount: 0.0,
            trade_rounding: 2,
            lots: vec![TaxLot {
                lot_id: "L1".to_string(),
                identifier: "VOO".to_string(),
                account_id: None,
                broker: None,
                quantity: 100.0,
                cost_basis: 60000.0,
                date_acquired: date(2025, 3, 1),
            }],
            targets: vec![
                Target {
                    asset_class: "Equity".to_string(),
                    target_weight: 0.5,
                    identifiers: vec!["VOO".to_string()],
                },
                Target {
                    asset_class: "Bond".to_string(),
                    target_weight: 0.5,
                    identifiers: vec!["BND".to_string()],
                },
            ],
            prices: Prices::new(prices),
            spreads: Spreads::new(spreads),
            factor_model: None,
        }
    }

    #[test]
    fn rounding_applied_and_zeros_dropped() {
        assert_eq!(round_quantity(1.23456, 2), 1.23);
        assert_eq!(round_quantity(0.004, 2), 0.0);
        assert_eq!(round_quantity(2.0, 0), 2.0);
    }

    #[test]
    fn sells_carry_gain_and_tlh_classification() {
        let strategy = sample_strategy();
        let current = date(2025, 6, 15);
        let gain_loss = strategy
            .gain_loss_report(current, &TaxRates::default())
            .unwrap();
        let mut problem = Problem::new();
        let vars = ProgramVariables::build(
            &mut problem,
            &strategy,
            &gain_loss,
            strategy.total_value().unwrap(),
        )
        .unwrap();

        // values: buys then one sell var; sell 40.004 shares of the
        // underwater lot (cost 600/share, price 500).
        let mut values = vec![0.0; problem.num_vars()];
        values[vars.sells[0].var.0] = 40.004;
        let settings = OptimizationSettings::default();
        let trades = synthesize_trades(&strategy, &vars, &values, &settings);

        assert_eq!(trades.len(), 1);
        let sell = &trades[0];
        assert_eq!(sell.side, TradeSide::Sell);
        assert_eq!(sell.lot_id.as_deref(), Some("L1"));
        assert_eq!(sell.quantity, 40.0);
        assert!((sell.realized_gain.unwrap() + 4000.0).abs() < 1e-9);
        assert_eq!(sell.gain_type, Some(GainType::ShortTerm));
        // 100/share loss on a 600 basis is far past the 1.5% threshold.
        assert_eq!(sell.is_tlh, Some(true));
        // Spread cost: 40 * 500 * 0.001.
        assert!((sell.transaction_cost - 20.0).abs() < 1e-9);
    }

    #[test]
    fn buys_have_no_lot_or_gain() {
        let strategy = sample_strategy();
        let mut problem = Problem::new();
        let vars = ProgramVariables::build(&mut problem, &strategy, &[], 50000.0).unwrap();
        let mut values = vec![0.0; problem.num_vars()];
        values[vars.buy_for("BND").unwrap().var.0] = 10.0;
        let settings = OptimizationSettings::default();
        let trades = synthesize_trades(&strategy, &vars, &values, &settings);

        assert_eq!(trades.len(), 1);
        let buy = &trades[0];
        assert_eq!(buy.side, TradeSide::Buy);
        assert!(buy.lot_id.is_none());
        assert!(buy.realized_gain.is_none());
        assert!(buy.is_tlh.is_none());
        assert_eq!(buy.strategy_id, 7);
    }
}
