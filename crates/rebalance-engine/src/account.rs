//! Account façade.
//!
//! Holds the strategies of one account, derives account-wide wash-sale
//! restrictions from the merged lot book, runs each strategy's optimization
//! in strategy-id order, and nets the resulting trades. A failing strategy
//! is recorded and skipped; the run continues.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use tracing::{error, info, warn};

use rebalance_core::{
    ClosedLot, EngineError, Prices, StockRestriction, Strategy, TaxLot, TaxRates, Trade,
    WashSaleRestrictions,
};

use crate::netting::net_trades;
use crate::settings::OptimizationSettings;
use crate::solver::{optimize_strategy, StrategyContext, StrategyResult};
use crate::withdrawal::{calculate_max_withdrawal, MaxWithdrawalResult};

/// Default inadvertent-wash protection buffer.
pub const DEFAULT_WASH_PROTECTION: f64 = 0.003;

pub struct Account {
    pub current_date: NaiveDate,
    pub tax_rates: TaxRates,
    pub stock_restrictions: Vec<StockRestriction>,
    pub recently_closed_lots: Vec<ClosedLot>,
    pub wash_protection: f64,
    strategies: Vec<Strategy>,
}

#[derive(Debug, Clone)]
pub struct AccountRunResult {
    pub results: BTreeMap<i64, StrategyResult>,
    pub netted_trades: Vec<Trade>,
    /// True when the run was cancelled before every strategy finished;
    /// `results` then holds only the strategies completed so far.
    pub cancelled: bool,
}

impl Account {
    pub fn new(
        current_date: NaiveDate,
        tax_rates: TaxRates,
        stock_restrictions: Vec<StockRestriction>,
        recently_closed_lots: Vec<ClosedLot>,
        wash_protection: f64,
        mut strategies: Vec<Strategy>,
    ) -> Self {
        // Strategy order is part of the contract.
        strategies.sort_by_key(|s| s.strategy_id);
        Self {
            current_date,
            tax_rates,
            stock_restrictions,
            recently_closed_lots,
            wash_protection,
            strategies,
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn strategy(&self, strategy_id: i64) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.strategy_id == strategy_id)
    }

    /// Validate every strategy up front. Any failure aborts the request.
    pub fn validate(&self) -> Result<(), EngineError> {
        for strategy in &self.strategies {
            strategy.validate()?;
        }
        Ok(())
    }

    /// The merged lot book across all strategies, for wash-sale derivation.
    fn gather_all_lots(&self) -> Vec<TaxLot> {
        self.strategies
            .iter()
            .flat_map(|s| s.lots.iter().cloned())
            .collect()
    }

    /// One price per identifier; the first strategy quoting it wins.
    fn gather_all_prices(&self) -> Prices {
        let mut prices = Prices::default();
        for strategy in &self.strategies {
            for (identifier, price) in strategy.prices.iter() {
                if !prices.contains(identifier) {
                    prices.insert(identifier.clone(), *price);
                }
            }
        }
        prices
    }

    /// Derive wash-sale restrictions from the account-wide book.
    pub fn wash_sale_restrictions(&self) -> WashSaleRestrictions {
        let all_lots = self.gather_all_lots();
        let prices = self.gather_all_prices();
        WashSaleRestrictions::derive(
            self.current_date,
            &all_lots,
            &prices,
            &self.recently_closed_lots,
            rebalance_core::wash_sale::DEFAULT_WASH_WINDOW_DAYS,
            self.wash_protection,
        )
    }

    /// Compute optimal trades for every strategy, then net across them.
    ///
    /// Per-strategy errors are logged and recorded as empty results; the
    /// other strategies still run and netting covers whatever traded.
    pub fn compute_optimal_trades(
        &self,
        settings: &BTreeMap<i64, OptimizationSettings>,
    ) -> AccountRunResult {
        self.compute_optimal_trades_cancellable(settings, &AtomicBool::new(false))
    }

    /// Like [`Self::compute_optimal_trades`], but checks `cancel` between
    /// strategies. Cancellation granularity is one strategy: results for
    /// strategies already completed are returned, nothing is mutated for
    /// the rest, and netting covers only the completed set.
    pub fn compute_optimal_trades_cancellable(
        &self,
        settings: &BTreeMap<i64, OptimizationSettings>,
        cancel: &AtomicBool,
    ) -> AccountRunResult {
        let wash_sales = self.wash_sale_restrictions();
        let ctx = StrategyContext {
            current_date: self.current_date,
            tax_rates: &self.tax_rates,
            stock_restrictions: &self.stock_restrictions,
            wash_sales: Some(&wash_sales),
        };

        info!(
            strategies = self.strategies.len(),
            "computing optimal trades for account"
        );

        let mut cancelled = false;
        let mut results = BTreeMap::new();
        for strategy in &self.strategies {
            if cancel.load(Ordering::Relaxed) {
                warn!(
                    strategy_id = strategy.strategy_id,
                    "run cancelled, returning partial results"
                );
                cancelled = true;
                break;
            }
            let strategy_settings = settings
                .get(&strategy.strategy_id)
                .cloned()
                .unwrap_or_default();
            let result = match optimize_strategy(strategy, &strategy_settings, &ctx) {
                Ok(result) => result,
                Err(err) => {
                    error!(
                        strategy_id = strategy.strategy_id,
                        error = %err,
                        "strategy optimization failed"
                    );
                    StrategyResult::failed()
                }
            };
            results.insert(strategy.strategy_id, result);
        }

        let all_trades: Vec<Trade> = results
            .values()
            .filter(|r| r.should_trade)
            .flat_map(|r| r.trades.iter().cloned())
            .collect();
        let trade_rounding = self
            .strategies
            .iter()
            .map(|s| s.trade_rounding)
            .min()
            .unwrap_or(0);
        let netted_trades = net_trades(&all_trades, trade_rounding);

        info!(netted = netted_trades.len(), "netting complete");
        AccountRunResult {
            results,
            netted_trades,
            cancelled,
        }
    }

    /// Maximum feasible withdrawal for one strategy.
    pub fn max_withdrawal(
        &self,
        strategy_id: i64,
        settings: &OptimizationSettings,
    ) -> Result<MaxWithdrawalResult, EngineError> {
        let strategy = self.strategy(strategy_id).ok_or_else(|| {
            EngineError::InvalidInput(format!("unknown strategy id {}", strategy_id))
        })?;
        let wash_sales = self.wash_sale_restrictions();
        let ctx = StrategyContext {
            current_date: self.current_date,
            tax_rates: &self.tax_rates,
            stock_restrictions: &self.stock_restrictions,
            wash_sales: Some(&wash_sales),
        };
        calculate_max_withdrawal(strategy, settings, &ctx)
    }
}
