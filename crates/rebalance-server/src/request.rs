//! Wire format of the optimization request.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Deserialize;

use rebalance_core::{
    ClosedLot, EngineError, FactorModel, Prices, Spreads, StockRestriction, Strategy,
    StrategyKind, Target, TaxLot, TaxRates,
};
use rebalance_engine::OptimizationSettings;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub oracle: OracleInput,
    #[serde(default)]
    pub settings: SettingsInput,
    #[serde(default)]
    pub max_withdrawal_amount_settings: Option<MaxWithdrawalSettingsInput>,
}

#[derive(Debug, Deserialize)]
pub struct OracleInput {
    pub current_date: NaiveDate,
    #[serde(default)]
    pub tax_rates: Vec<TaxRateRow>,
    #[serde(default)]
    pub stock_restrictions: Vec<StockRestriction>,
    #[serde(default)]
    pub recently_closed_lots: Vec<ClosedLot>,
    #[serde(default = "default_wash_protection")]
    pub percentage_protection_from_inadvertent_wash_sales: f64,
    pub strategies: BTreeMap<String, StrategyInput>,
}

fn default_wash_protection() -> f64 {
    rebalance_engine::account::DEFAULT_WASH_PROTECTION
}

#[derive(Debug, Deserialize)]
pub struct TaxRateRow {
    #[serde(rename = "type")]
    pub kind: String,
    pub rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct PriceRow {
    pub identifier: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct SpreadRow {
    pub identifier: String,
    pub spread: f64,
}

#[derive(Debug, Deserialize)]
pub struct StrategyInput {
    pub kind: StrategyKind,
    #[serde(default)]
    pub label: Option<String>,
    pub cash: f64,
    #[serde(default)]
    pub min_cash: f64,
    #[serde(default)]
    pub withdrawal_amount: f64,
    #[serde(default = "default_trade_rounding")]
    pub trade_rounding: u32,
    #[serde(default)]
    pub tax_lots: Vec<TaxLot>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub prices: Vec<PriceRow>,
    #[serde(default)]
    pub spreads: Vec<SpreadRow>,
    #[serde(default)]
    pub factor_model: Option<FactorModel>,
}

fn default_trade_rounding() -> u32 {
    4
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsInput {
    #[serde(default)]
    pub strategies: BTreeMap<String, OptimizationSettings>,
}

#[derive(Debug, Deserialize)]
pub struct MaxWithdrawalSettingsInput {
    #[serde(default)]
    pub strategies: BTreeMap<String, OptimizationSettings>,
}

fn parse_strategy_id(raw: &str) -> Result<i64, EngineError> {
    raw.parse::<i64>()
        .map_err(|_| EngineError::InvalidInput(format!("strategy id {} is not an integer", raw)))
}

impl Request {
    pub fn tax_rates(&self) -> Result<TaxRates, EngineError> {
        let rows: Vec<(String, f64)> = self
            .oracle
            .tax_rates
            .iter()
            .map(|row| (row.kind.clone(), row.rate))
            .collect();
        TaxRates::from_rows(&rows)
    }

    pub fn strategies(&self) -> Result<Vec<Strategy>, EngineError> {
        let mut strategies = Vec::with_capacity(self.oracle.strategies.len());
        for (raw_id, input) in &self.oracle.strategies {
            let strategy_id = parse_strategy_id(raw_id)?;
            let prices: HashMap<String, f64> = input
                .prices
                .iter()
                .map(|row| (row.identifier.clone(), row.price))
                .collect();
            let spreads: HashMap<String, f64> = input
                .spreads
                .iter()
                .map(|row| (row.identifier.clone(), row.spread))
                .collect();
            strategies.push(Strategy {
                strategy_id,
                label: input.label.clone(),
                kind: input.kind,
                cash: input.cash,
                min_cash: input.min_cash,
                withdrawal_amount: input.withdrawal_amount,
                trade_rounding: input.trade_rounding,
                lots: input.tax_lots.clone(),
                targets: input.targets.clone(),
                prices: Prices::new(prices),
                spreads: Spreads::new(spreads),
                factor_model: input.factor_model.clone(),
            });
        }
        Ok(strategies)
    }

    pub fn optimization_settings(&self) -> Result<BTreeMap<i64, OptimizationSettings>, EngineError> {
        let mut settings = BTreeMap::new();
        for (raw_id, value) in &self.settings.strategies {
            settings.insert(parse_strategy_id(raw_id)?, value.clone());
        }
        Ok(settings)
    }

    pub fn max_withdrawal_settings(
        &self,
    ) -> Result<Option<BTreeMap<i64, OptimizationSettings>>, EngineError> {
        let Some(input) = &self.max_withdrawal_amount_settings else {
            return Ok(None);
        };
        let mut settings = BTreeMap::new();
        for (raw_id, value) in &input.strategies {
            settings.insert(parse_strategy_id(raw_id)?, value.clone());
        }
        Ok(Some(settings))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MINIMAL_REQUEST: &str = r#"{
        "oracle": {
            "current_date": "2025-06-16",
            "tax_rates": [
                {"type": "short_term", "rate": 0.35},
                {"type": "long_term", "rate": 0.15}
            ],
            "stock_restrictions": [],
            "recently_closed_lots": [],
            "percentage_protection_from_inadvertent_wash_sales": 0.003,
            "strategies": {
                "1": {
                    "kind": "TAX_AWARE",
                    "cash": 0.0,
                    "min_cash": 0.0,
                    "withdrawal_amount": 0.0,
                    "trade_rounding": 4,
                    "tax_lots": [
                        {"lot_id": "L1", "identifier": "VOO", "quantity": 100.0,
                         "cost_basis": 40000.0, "date_acquired": "2024-05-01"},
                        {"lot_id": "L2", "identifier": "BND", "quantity": 200.0,
                         "cost_basis": 20000.0, "date_acquired": "2024-02-01"}
                    ],
                    "targets": [
                        {"asset_class": "Equity", "target_weight": 0.5, "identifiers": ["VOO"]},
                        {"asset_class": "Bond", "target_weight": 0.5, "identifiers": ["BND"]}
                    ],
                    "prices": [
                        {"identifier": "VOO", "price": 500.0},
                        {"identifier": "BND", "price": 100.0}
                    ],
                    "spreads": [
                        {"identifier": "VOO", "spread": 0.0005}
                    ]
                }
            }
        },
        "settings": {
            "strategies": {
                "1": {"min_notional": 100.0}
            }
        }
    }"#;

    #[test]
    fn minimal_request_parses() {
        let request: Request = serde_json::from_str(MINIMAL_REQUEST).unwrap();
        assert_eq!(
            request.oracle.current_date,
            NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
        );
        let strategies = request.strategies().unwrap();
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].strategy_id, 1);
        assert_eq!(strategies[0].kind, StrategyKind::TaxAware);
        assert_eq!(strategies[0].lots.len(), 2);
        assert_eq!(strategies[0].spreads.get("VOO"), 0.0005);

        let rates = request.tax_rates().unwrap();
        assert_eq!(rates.short_term, 0.35);
        assert_eq!(rates.long_term, 0.15);

        let settings = request.optimization_settings().unwrap();
        assert_eq!(settings[&1].min_notional, 100.0);
    }

    #[test]
    fn unknown_strategy_kind_rejected() {
        let raw = MINIMAL_REQUEST.replace("TAX_AWARE", "MYSTERY");
        assert!(serde_json::from_str::<Request>(&raw).is_err());
    }

    #[test]
    fn non_integer_strategy_id_rejected() {
        let raw = MINIMAL_REQUEST.replace("\"1\":", "\"one\":");
        let request: Request = serde_json::from_str(&raw).unwrap();
        assert!(request.strategies().is_err());
    }
}
