//! Maximum feasible withdrawal for a strategy.
//!
//! A sells-only program under the same pre-trade restrictions as a normal
//! run: maximize after-spread sale proceeds, then add the cash already
//! above the floor. Drift bands are not applied; a withdrawal of this size
//! is allowed to unwind the allocation.

use serde::Serialize;
use tracing::info;

use milp_solver::{solve_milp, LinExpr, Problem, SolveResult};
use rebalance_core::{EngineError, Strategy, Trade};

use crate::constraints;
use crate::constraints::{ConstraintContext, SolveMode};
use crate::settings::OptimizationSettings;
use crate::solver::StrategyContext;
use crate::trades::synthesize_trades;
use crate::variables::ProgramVariables;

#[derive(Debug, Clone, Serialize)]
pub struct MaxWithdrawalResult {
    pub max_withdrawal: f64,
    pub trades: Vec<Trade>,
}

/// Compute the largest withdrawal the strategy can fund.
pub fn calculate_max_withdrawal(
    strategy: &Strategy,
    settings: &OptimizationSettings,
    ctx: &StrategyContext<'_>,
) -> Result<MaxWithdrawalResult, EngineError> {
    let total_value = strategy.total_value()?;
    let drift = strategy.drift_report()?;
    let gain_loss = strategy.gain_loss_report(ctx.current_date, ctx.tax_rates)?;

    let mut problem = Problem::new();
    let vars = ProgramVariables::build(&mut problem, strategy, &gain_loss, total_value)?;

    // Pre-trade pins and trade-size rules apply; everything else is off.
    let constraint_ctx = ConstraintContext {
        strategy,
        settings,
        drift: &drift,
        stock_restrictions: ctx.stock_restrictions,
        wash_sales: ctx.wash_sales,
        total_value,
        mode: SolveMode::Rebalance,
    };
    constraints::apply_stock_restrictions(&mut problem, &vars, &constraint_ctx);
    constraints::apply_wash_sale_restrictions(&mut problem, &vars, &constraint_ctx);
    constraints::apply_holding_time(&mut problem, &vars, &constraint_ctx);
    for buy in &vars.buys {
        problem.fix(buy.var, 0.0);
    }
    constraints::apply_min_notional(&mut problem, &vars, &constraint_ctx);

    // Maximize after-spread proceeds.
    let mut objective = LinExpr::new();
    let scale = if total_value > 0.0 { total_value } else { 1.0 };
    for sell in &vars.sells {
        objective.add_term(sell.var, -sell.price * (1.0 - sell.spread) / scale);
    }
    problem.set_objective(objective);

    let (proceeds, trades) = match solve_milp(&problem) {
        SolveResult::Optimal { values, .. } => {
            let trades = synthesize_trades(strategy, &vars, &values, settings);
            let proceeds: f64 = trades
                .iter()
                .map(|t| t.notional() - t.transaction_cost)
                .sum();
            (proceeds, trades)
        }
        _ => (0.0, Vec::new()),
    };

    let max_withdrawal = (strategy.cash - strategy.min_cash + proceeds).max(0.0);
    info!(
        strategy_id = strategy.strategy_id,
        max_withdrawal, "max withdrawal computed"
    );

    Ok(MaxWithdrawalResult {
        max_withdrawal,
        trades,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rebalance_core::{
        Prices, Spreads, StrategyKind, Target, TaxLot, TaxRates, WashSaleRestrictions,
    };
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn strategy() -> Strategy {
        let mut prices = HashMap::new();
        prices.insert("VOO".to_string(), 500.0);
        Strategy {
            strategy_id: 1,
            label: None,
            kind: StrategyKind::TaxAware,
            cash: 2000.0,
            min_cash: 500.0,
            withdrawal_amount: 0.0,
            trade_rounding: 4,
            lots: vec![TaxLot {
                lot_id: "L1".to_string(),
                identifier: "VOO".to_string(),
                account_id: None,
                broker: None,
                quantity: 10.0,
                cost_basis: 4000.0,
                date_acquired: date(2024, 1, 1),
            }],
            targets: vec![Target {
                asset_class: "Equity".to_string(),
                target_weight: 1.0,
                identifiers: vec!["VOO".to_string()],
            }],
            prices: Prices::new(prices),
            spreads: Spreads::default(),
            factor_model: None,
        }
    }

    #[test]
    fn full_liquidation_when_unrestricted() {
        let strategy = strategy();
        let settings = OptimizationSettings::default();
        let rates = TaxRates::default();
        let ctx = StrategyContext {
            current_date: date(2025, 6, 15),
            tax_rates: &rates,
            stock_restrictions: &[],
            wash_sales: None,
        };
        let result = calculate_max_withdrawal(&strategy, &settings, &ctx).unwrap();
        // cash 2000 - min_cash 500 + 10 * 500 proceeds.
        assert!((result.max_withdrawal - 6500.0).abs() < 1e-6);
        assert_eq!(result.trades.len(), 1);
    }

    #[test]
    fn restricted_lot_reduces_capacity() {
        let strategy = strategy();
        let settings = OptimizationSettings::default();
        let rates = TaxRates::default();
        // A second recent purchase puts the underwater lot under a sell
        // restriction. Lot is at a gain here (500 vs 400 basis), so add a
        // price drop to make it underwater.
        let mut cheap = strategy.clone();
        cheap.prices = Prices::new(
            [("VOO".to_string(), 300.0)].into_iter().collect(),
        );
        let mut all_lots = cheap.lots.clone();
        all_lots.push(TaxLot {
            lot_id: "L2".to_string(),
            identifier: "VOO".to_string(),
            account_id: None,
            broker: None,
            quantity: 1.0,
            cost_basis: 300.0,
            date_acquired: date(2025, 6, 10),
        });
        cheap.lots = all_lots.clone();
        let ws = WashSaleRestrictions::derive(
            date(2025, 6, 15),
            &all_lots,
            &cheap.prices,
            &[],
            30,
            0.003,
        );
        let ctx = StrategyContext {
            current_date: date(2025, 6, 15),
            tax_rates: &rates,
            stock_restrictions: &[],
            wash_sales: Some(&ws),
        };
        let result = calculate_max_withdrawal(&cheap, &settings, &ctx).unwrap();
        // L1 is a loss lot with a recent companion purchase, so it is
        // pinned; only free cash plus the small recent lot is withdrawable.
        assert!((result.max_withdrawal - 1800.0).abs() < 1e-6);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].lot_id.as_deref(), Some("L2"));
    }
}
