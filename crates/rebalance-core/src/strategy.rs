//! Per-strategy portfolio model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::drift::{DriftReport, FactorReport};
use crate::error::EngineError;
use crate::types::{
    FactorModel, GainLossRow, GainType, Prices, Spreads, Target, TaxLot, TaxRates, Trade,
    TradeSide,
};

/// Objective term weights. Dimensionless; each term carries its own
/// normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    pub tax: f64,
    pub drift: f64,
    pub transaction: f64,
    pub factor_model: f64,
    pub cash_drag: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            tax: 1.0,
            drift: 1.0,
            transaction: 1.0,
            factor_model: 0.0,
            cash_drag: 0.0,
        }
    }
}

/// What kind of optimization a strategy runs. Behavior differences live
/// here as per-variant weight adjustment and predicates, not subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    TaxAware,
    PairsTlh,
    DirectIndex,
    Hold,
    Liquidate,
}

impl StrategyKind {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "TAX_AWARE" => Ok(Self::TaxAware),
            "PAIRS_TLH" => Ok(Self::PairsTlh),
            "DIRECT_INDEX" => Ok(Self::DirectIndex),
            "HOLD" => Ok(Self::Hold),
            "LIQUIDATE" => Ok(Self::Liquidate),
            other => Err(EngineError::UnknownStrategyKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaxAware => "TAX_AWARE",
            Self::PairsTlh => "PAIRS_TLH",
            Self::DirectIndex => "DIRECT_INDEX",
            Self::Hold => "HOLD",
            Self::Liquidate => "LIQUIDATE",
        }
    }

    /// Adjust configured weights for this kind of strategy.
    pub fn adjust_weights(&self, weights: Weights) -> Weights {
        match self {
            Self::TaxAware => weights,
            Self::PairsTlh => Weights {
                tax: weights.tax * 2.0,
                drift: weights.drift * 2.0,
                ..weights
            },
            Self::DirectIndex => Weights {
                factor_model: if weights.factor_model > 0.0 {
                    weights.factor_model
                } else {
                    1.0
                },
                ..weights
            },
            Self::Hold => Weights {
                tax: 0.0,
                drift: 0.0,
                transaction: 0.0,
                factor_model: 0.0,
                cash_drag: 0.0,
            },
            Self::Liquidate => Weights {
                drift: 0.0,
                factor_model: 0.0,
                cash_drag: 0.0,
                ..weights
            },
        }
    }

    /// Whether post-trade asset-class weights are banded around targets.
    pub fn uses_drift_band(&self) -> bool {
        matches!(self, Self::PairsTlh | Self::DirectIndex)
    }

    /// Whether non-cash buys are pinned to zero.
    pub fn forces_no_buy(&self) -> bool {
        matches!(self, Self::Liquidate)
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Self::Hold)
    }
}

/// One strategy inside an account: its lots, targets, prices, spreads, cash
/// and policy numbers. The account holds many; each owns its lots
/// exclusively and sees the account-wide book only through the wash-sale
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub strategy_id: i64,
    #[serde(default)]
    pub label: Option<String>,
    pub kind: StrategyKind,
    pub cash: f64,
    pub min_cash: f64,
    pub withdrawal_amount: f64,
    /// Decimals trades are rounded to, 0..=8.
    pub trade_rounding: u32,
    pub lots: Vec<TaxLot>,
    pub targets: Vec<Target>,
    pub prices: Prices,
    pub spreads: Spreads,
    #[serde(default)]
    pub factor_model: Option<FactorModel>,
}

impl Strategy {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cash < 0.0 || !self.cash.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "strategy {} has invalid cash {}",
                self.strategy_id, self.cash
            )));
        }
        if self.min_cash < 0.0 || !self.min_cash.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "strategy {} has invalid min_cash {}",
                self.strategy_id, self.min_cash
            )));
        }
        if self.withdrawal_amount < 0.0 || !self.withdrawal_amount.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "strategy {} has invalid withdrawal_amount {}",
                self.strategy_id, self.withdrawal_amount
            )));
        }
        if self.trade_rounding > 8 {
            return Err(EngineError::InvalidInput(format!(
                "strategy {} trade_rounding {} out of range 0..=8",
                self.strategy_id, self.trade_rounding
            )));
        }
        self.prices.validate()?;
        self.spreads.validate()?;
        for lot in &self.lots {
            lot.validate()?;
            if !self.prices.contains(&lot.identifier) {
                return Err(EngineError::MissingPrice(lot.identifier.clone()));
            }
        }
        for target in &self.targets {
            for id in &target.identifiers {
                if !self.prices.contains(id) {
                    return Err(EngineError::MissingPrice(id.clone()));
                }
            }
        }
        let target_sum: f64 = self.targets.iter().map(|t| t.target_weight).sum();
        if !self.targets.is_empty() && (target_sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::TargetWeightSum(target_sum));
        }
        if let Some(model) = &self.factor_model {
            model.validate()?;
        }
        Ok(())
    }

    /// Cash plus market value of all open lots.
    pub fn total_value(&self) -> Result<f64, EngineError> {
        let mut total = self.cash;
        for lot in &self.lots {
            total += lot.quantity * self.prices.require(&lot.identifier)?;
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> bool {
        self.lots.iter().all(|l| l.quantity <= 0.0)
            && !self
                .targets
                .iter()
                .any(|t| t.identifiers.iter().any(|i| i != crate::types::CASH_ID))
    }

    /// Per-lot unrealized gain/loss rows as of `current_date`.
    pub fn gain_loss_report(
        &self,
        current_date: NaiveDate,
        tax_rates: &TaxRates,
    ) -> Result<Vec<GainLossRow>, EngineError> {
        let mut rows = Vec::with_capacity(self.lots.len());
        for lot in &self.lots {
            if lot.quantity <= 0.0 {
                continue;
            }
            let price = self.prices.require(&lot.identifier)?;
            let days_held = lot.days_held(current_date);
            let gain_type = GainType::from_days_held(days_held);
            let current_value = lot.quantity * price;
            rows.push(GainLossRow {
                lot_id: lot.lot_id.clone(),
                identifier: lot.identifier.clone(),
                quantity: lot.quantity,
                unit_cost_basis: lot.unit_cost_basis(),
                cost_basis: lot.cost_basis,
                price,
                current_value,
                unrealized_gain: current_value - lot.cost_basis,
                days_held,
                gain_type,
                sell_tax_rate: tax_rates.combined(gain_type),
            });
        }
        Ok(rows)
    }

    pub fn drift_report(&self) -> Result<DriftReport, EngineError> {
        DriftReport::compute(self.cash, &self.lots, &self.targets, &self.prices)
    }

    pub fn factor_report(&self) -> Result<Option<FactorReport>, EngineError> {
        match &self.factor_model {
            Some(model) => Ok(Some(FactorReport::compute(
                self.cash,
                &self.lots,
                &self.prices,
                model,
            )?)),
            None => Ok(None),
        }
    }

    /// Snapshot of this strategy after applying `trades`.
    ///
    /// Sells reduce the referenced lot (quantity and cost basis pro rata);
    /// buys append a new lot acquired on `current_date`. Cash moves by
    /// proceeds and costs net of spread, minus the withdrawal. The original
    /// strategy is untouched.
    pub fn apply_trades(
        &self,
        trades: &[Trade],
        current_date: NaiveDate,
    ) -> Result<Strategy, EngineError> {
        let mut snapshot = self.clone();
        let mut buy_seq = 0usize;

        for trade in trades {
            match trade.side {
                TradeSide::Sell => {
                    let lot_id = trade.lot_id.as_deref().ok_or_else(|| {
                        EngineError::InvalidInput(format!(
                            "sell of {} has no lot_id",
                            trade.identifier
                        ))
                    })?;
                    let lot = snapshot
                        .lots
                        .iter_mut()
                        .find(|l| l.lot_id == lot_id)
                        .ok_or_else(|| {
                            EngineError::InvalidInput(format!("unknown lot_id {}", lot_id))
                        })?;
                    if trade.quantity > lot.quantity + 1e-9 {
                        return Err(EngineError::InvalidInput(format!(
                            "sell of {} exceeds lot {} quantity",
                            trade.identifier, lot_id
                        )));
                    }
                    let fraction = (trade.quantity / lot.quantity).min(1.0);
                    lot.cost_basis *= 1.0 - fraction;
                    lot.quantity -= trade.quantity;
                    snapshot.cash += trade.quantity * trade.price
                        * (1.0 - self.spreads.get(&trade.identifier));
                }
                TradeSide::Buy => {
                    buy_seq += 1;
                    snapshot.cash -= trade.quantity * trade.price
                        * (1.0 + self.spreads.get(&trade.identifier));
                    snapshot.lots.push(TaxLot {
                        lot_id: format!(
                            "{}-{}-{}",
                            self.strategy_id,
                            current_date.format("%Y%m%d"),
                            buy_seq
                        ),
                        identifier: trade.identifier.clone(),
                        account_id: None,
                        broker: None,
                        quantity: trade.quantity,
                        cost_basis: trade.quantity * trade.price,
                        date_acquired: current_date,
                    });
                }
            }
        }

        snapshot.cash -= self.withdrawal_amount;
        snapshot.lots.retain(|l| l.quantity > 0.0);
        Ok(snapshot)
    }
}
