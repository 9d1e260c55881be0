//! Domain types shared across the engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;

/// Pseudo-identifier for the cash position. Unit price 1.0, zero spread,
/// its own asset class.
pub const CASH_ID: &str = "_CASH";

/// Days held at or above which a realized gain is long-term.
pub const LONG_TERM_THRESHOLD_DAYS: i64 = 365;

/// An individually tracked purchase with its own cost basis and acquisition
/// date. Owned by exactly one strategy; observed account-wide for wash-sale
/// purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxLot {
    pub lot_id: String,
    pub identifier: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub broker: Option<String>,
    /// Number of shares. Never negative.
    pub quantity: f64,
    /// Total cost basis for the lot (not per share). Never negative.
    pub cost_basis: f64,
    pub date_acquired: NaiveDate,
}

impl TaxLot {
    pub fn unit_cost_basis(&self) -> f64 {
        if self.quantity > 0.0 {
            self.cost_basis / self.quantity
        } else {
            0.0
        }
    }

    pub fn days_held(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.date_acquired).num_days()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.quantity < 0.0 || !self.quantity.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "lot {} has invalid quantity {}",
                self.lot_id, self.quantity
            )));
        }
        if self.cost_basis < 0.0 || !self.cost_basis.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "lot {} has invalid cost basis {}",
                self.lot_id, self.cost_basis
            )));
        }
        Ok(())
    }
}

/// A lot that was closed recently enough to matter for wash-sale windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedLot {
    pub identifier: String,
    pub quantity: f64,
    pub cost_basis: f64,
    pub date_acquired: NaiveDate,
    pub date_sold: NaiveDate,
    pub proceeds: f64,
    pub realized_gain: f64,
}

/// Price snapshot for one optimization run. Never mutated during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prices(HashMap<String, f64>);

impl Prices {
    pub fn new(map: HashMap<String, f64>) -> Self {
        Self(map)
    }

    /// Price for an identifier. Cash is always 1.0.
    pub fn get(&self, identifier: &str) -> Option<f64> {
        if identifier == CASH_ID {
            return Some(1.0);
        }
        self.0.get(identifier).copied()
    }

    pub fn require(&self, identifier: &str) -> Result<f64, EngineError> {
        self.get(identifier)
            .ok_or_else(|| EngineError::MissingPrice(identifier.to_string()))
    }

    pub fn insert(&mut self, identifier: String, price: f64) {
        self.0.insert(identifier, price);
    }

    pub fn contains(&self, identifier: &str) -> bool {
        identifier == CASH_ID || self.0.contains_key(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (id, price) in &self.0 {
            if *price < 0.0 || !price.is_finite() {
                return Err(EngineError::InvalidInput(format!(
                    "price for {} is invalid: {}",
                    id, price
                )));
            }
        }
        Ok(())
    }
}

/// Transaction-cost rates as a fraction of notional, by identifier.
/// Missing identifiers and cash trade at zero spread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spreads(HashMap<String, f64>);

impl Spreads {
    pub fn new(map: HashMap<String, f64>) -> Self {
        Self(map)
    }

    pub fn get(&self, identifier: &str) -> f64 {
        if identifier == CASH_ID {
            return 0.0;
        }
        self.0.get(identifier).copied().unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (id, spread) in &self.0 {
            if *spread < 0.0 || !spread.is_finite() {
                return Err(EngineError::InvalidInput(format!(
                    "spread for {} is invalid: {}",
                    id, spread
                )));
            }
        }
        Ok(())
    }
}

/// Target weight for one asset class. The identifier list is ordered by
/// preference: the primary security first, alternates after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub asset_class: String,
    pub target_weight: f64,
    pub identifiers: Vec<String>,
}

/// Direction of an externally supplied hard restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionDirection {
    Buy,
    Sell,
    Both,
}

impl RestrictionDirection {
    pub fn blocks_buy(&self) -> bool {
        matches!(self, Self::Buy | Self::Both)
    }

    pub fn blocks_sell(&self) -> bool {
        matches!(self, Self::Sell | Self::Both)
    }
}

/// Hard restriction supplied externally (compliance, client preference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRestriction {
    pub identifier: String,
    pub direction: RestrictionDirection,
}

/// Capital gains tax rates by kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaxRates {
    pub short_term: f64,
    pub long_term: f64,
    pub state_short: f64,
    pub state_long: f64,
    pub niit: f64,
}

impl Default for TaxRates {
    fn default() -> Self {
        Self {
            short_term: 0.37,
            long_term: 0.20,
            state_short: 0.0,
            state_long: 0.0,
            niit: 0.038,
        }
    }
}

impl TaxRates {
    /// Build from `[{"type": ..., "rate": ...}]` rows as they arrive on the
    /// wire. Unknown kinds are rejected; missing kinds keep defaults.
    pub fn from_rows(rows: &[(String, f64)]) -> Result<Self, EngineError> {
        let mut rates = Self::default();
        for (kind, rate) in rows {
            if !rate.is_finite() || *rate < 0.0 {
                return Err(EngineError::NonfiniteRate(kind.clone()));
            }
            match kind.as_str() {
                "short_term" => rates.short_term = *rate,
                "long_term" => rates.long_term = *rate,
                "state_short" => rates.state_short = *rate,
                "state_long" => rates.state_long = *rate,
                "niit" => rates.niit = *rate,
                other => {
                    return Err(EngineError::InvalidInput(format!(
                        "unknown tax rate type: {}",
                        other
                    )))
                }
            }
        }
        Ok(rates)
    }

    /// Combined federal + state rate for a holding period.
    pub fn combined(&self, gain_type: GainType) -> f64 {
        match gain_type {
            GainType::ShortTerm => self.short_term + self.state_short,
            GainType::LongTerm => self.long_term + self.state_long,
        }
    }
}

/// Holding-period classification of a realized gain or loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainType {
    ShortTerm,
    LongTerm,
}

impl GainType {
    pub fn from_days_held(days: i64) -> Self {
        if days >= LONG_TERM_THRESHOLD_DAYS {
            Self::LongTerm
        } else {
            Self::ShortTerm
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A single buy or sell decision. Sells reference the specific lot they
/// consume and carry the realized gain; buys do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub strategy_id: i64,
    #[serde(default)]
    pub lot_id: Option<String>,
    pub identifier: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    #[serde(default)]
    pub realized_gain: Option<f64>,
    #[serde(default)]
    pub gain_type: Option<GainType>,
    pub transaction_cost: f64,
    #[serde(default)]
    pub is_tlh: Option<bool>,
}

impl Trade {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Per-lot unrealized gain/loss view, regenerated for each solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainLossRow {
    pub lot_id: String,
    pub identifier: String,
    pub quantity: f64,
    pub unit_cost_basis: f64,
    pub cost_basis: f64,
    pub price: f64,
    pub current_value: f64,
    pub unrealized_gain: f64,
    pub days_held: i64,
    pub gain_type: GainType,
    /// Combined federal + state rate applicable if sold today.
    pub sell_tax_rate: f64,
}

/// Per-identifier factor exposures plus the strategy's target exposure
/// vector. Factor order is shared across all vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorModel {
    pub factor_names: Vec<String>,
    /// identifier -> exposure per factor, aligned with `factor_names`.
    pub exposures: HashMap<String, Vec<f64>>,
    pub target_exposures: Vec<f64>,
}

impl FactorModel {
    pub fn exposure(&self, identifier: &str, factor_idx: usize) -> f64 {
        self.exposures
            .get(identifier)
            .and_then(|v| v.get(factor_idx))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn num_factors(&self) -> usize {
        self.factor_names.len()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.target_exposures.len() != self.factor_names.len() {
            return Err(EngineError::InvalidInput(format!(
                "factor model has {} factors but {} target exposures",
                self.factor_names.len(),
                self.target_exposures.len()
            )));
        }
        for (id, exposures) in &self.exposures {
            if exposures.len() != self.factor_names.len() {
                return Err(EngineError::InvalidInput(format!(
                    "factor exposures for {} have wrong length",
                    id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_price_is_unit() {
        let prices = Prices::default();
        assert_eq!(prices.get(CASH_ID), Some(1.0));
        assert_eq!(prices.get("VOO"), None);
    }

    #[test]
    fn cash_spread_is_zero() {
        let mut map = HashMap::new();
        map.insert("VOO".to_string(), 0.001);
        let spreads = Spreads::new(map);
        assert_eq!(spreads.get(CASH_ID), 0.0);
        assert_eq!(spreads.get("VOO"), 0.001);
        assert_eq!(spreads.get("BND"), 0.0);
    }

    #[test]
    fn gain_type_boundary() {
        assert_eq!(GainType::from_days_held(364), GainType::ShortTerm);
        assert_eq!(GainType::from_days_held(365), GainType::LongTerm);
    }

    #[test]
    fn tax_rates_from_rows() {
        let rows = vec![
            ("short_term".to_string(), 0.35),
            ("long_term".to_string(), 0.15),
            ("niit".to_string(), 0.038),
        ];
        let rates = TaxRates::from_rows(&rows).unwrap();
        assert_eq!(rates.short_term, 0.35);
        assert_eq!(rates.long_term, 0.15);
        assert!(TaxRates::from_rows(&[("bogus".to_string(), 0.1)]).is_err());
        assert!(TaxRates::from_rows(&[("niit".to_string(), f64::NAN)]).is_err());
    }

    #[test]
    fn lot_validation() {
        let lot = TaxLot {
            lot_id: "L1".to_string(),
            identifier: "VOO".to_string(),
            account_id: None,
            broker: None,
            quantity: -1.0,
            cost_basis: 100.0,
            date_acquired: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        assert!(lot.validate().is_err());
    }
}
