//! Decision-variable emission.
//!
//! One continuous buy variable per targeted identifier and one continuous
//! sell variable per open lot, all dense-indexed into the program. Units are
//! shares; rounding happens only at trade synthesis.

use std::collections::HashMap;

use milp_solver::{Problem, VarId};
use rebalance_core::{EngineError, GainLossRow, GainType, Strategy, CASH_ID};

#[derive(Debug, Clone)]
pub struct BuyVar {
    pub identifier: String,
    pub var: VarId,
    pub price: f64,
    pub spread: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone)]
pub struct SellVar {
    pub lot_id: String,
    pub identifier: String,
    pub var: VarId,
    pub price: f64,
    pub spread: f64,
    /// Lot quantity; also the variable's upper bound.
    pub quantity: f64,
    pub unit_cost_basis: f64,
    pub cost_basis: f64,
    pub days_held: i64,
    pub gain_type: GainType,
    pub sell_tax_rate: f64,
}

/// All decision variables of one strategy's program.
#[derive(Debug, Clone)]
pub struct ProgramVariables {
    pub buys: Vec<BuyVar>,
    pub sells: Vec<SellVar>,
    buy_index: HashMap<String, usize>,
}

impl ProgramVariables {
    /// Emit buy and sell variables into `problem`.
    ///
    /// Buy variables cover every identifier appearing in any target except
    /// cash, in target order, deduplicated. Sell variables follow the
    /// gain/loss report (lot order). Buy quantity is bounded by what the
    /// whole portfolio could afford at the current price.
    pub fn build(
        problem: &mut Problem,
        strategy: &Strategy,
        gain_loss: &[GainLossRow],
        total_value: f64,
    ) -> Result<Self, EngineError> {
        let mut buys = Vec::new();
        let mut buy_index = HashMap::new();

        for target in &strategy.targets {
            for identifier in &target.identifiers {
                if identifier == CASH_ID || buy_index.contains_key(identifier) {
                    continue;
                }
                let price = strategy.prices.require(identifier)?;
                if price <= 0.0 {
                    continue;
                }
                let upper_bound = (total_value / price).max(0.0);
                let var = problem.add_var(format!("buy_{}", identifier), 0.0, upper_bound);
                buy_index.insert(identifier.clone(), buys.len());
                buys.push(BuyVar {
                    identifier: identifier.clone(),
                    var,
                    price,
                    spread: strategy.spreads.get(identifier),
                    upper_bound,
                });
            }
        }

        let mut sells = Vec::with_capacity(gain_loss.len());
        for row in gain_loss {
            let var = problem.add_var(format!("sell_{}", row.lot_id), 0.0, row.quantity);
            sells.push(SellVar {
                lot_id: row.lot_id.clone(),
                identifier: row.identifier.clone(),
                var,
                price: row.price,
                spread: strategy.spreads.get(&row.identifier),
                quantity: row.quantity,
                unit_cost_basis: row.unit_cost_basis,
                cost_basis: row.cost_basis,
                days_held: row.days_held,
                gain_type: row.gain_type,
                sell_tax_rate: row.sell_tax_rate,
            });
        }

        Ok(Self {
            buys,
            sells,
            buy_index,
        })
    }

    pub fn buy_for(&self, identifier: &str) -> Option<&BuyVar> {
        self.buy_index.get(identifier).map(|&i| &self.buys[i])
    }

    pub fn sells_for<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = &'a SellVar> {
        self.sells.iter().filter(move |s| s.identifier == identifier)
    }
}
