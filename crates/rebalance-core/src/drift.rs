//! Drift and factor-exposure reports.
//!
//! A drift report has one row per asset class with target and actual
//! weights. Targets are renormalized to sum to 1; actual weights are derived
//! from the lot book and never adjusted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::types::{FactorModel, Prices, Target, TaxLot, CASH_ID};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftRow {
    pub asset_class: String,
    pub target_weight: f64,
    pub actual_weight: f64,
    /// Class members in preference order (primary first).
    pub identifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub rows: Vec<DriftRow>,
    pub total_value: f64,
}

impl DriftReport {
    /// Compute actual vs target weights per asset class.
    ///
    /// Held identifiers that appear in no target get their own row with a
    /// zero target so actual weights still sum to 1.
    pub fn compute(
        cash: f64,
        lots: &[TaxLot],
        targets: &[Target],
        prices: &Prices,
    ) -> Result<Self, EngineError> {
        let mut position_values: HashMap<&str, f64> = HashMap::new();
        let mut total_value = cash;
        for lot in lots {
            let price = prices.require(&lot.identifier)?;
            let value = lot.quantity * price;
            *position_values.entry(lot.identifier.as_str()).or_insert(0.0) += value;
            total_value += value;
        }

        let target_sum: f64 = targets.iter().map(|t| t.target_weight).sum();
        if target_sum <= 0.0 || !target_sum.is_finite() {
            return Err(EngineError::TargetWeightSum(target_sum));
        }

        let mut rows = Vec::with_capacity(targets.len() + 1);
        let mut assigned: Vec<&str> = Vec::new();
        let mut has_cash_row = false;

        for target in targets {
            let is_cash_class = target.identifiers.iter().any(|i| i == CASH_ID)
                || target.asset_class == CASH_ID;
            let actual = if is_cash_class {
                has_cash_row = true;
                cash
            } else {
                target
                    .identifiers
                    .iter()
                    .map(|i| position_values.get(i.as_str()).copied().unwrap_or(0.0))
                    .sum()
            };
            for id in &target.identifiers {
                assigned.push(id.as_str());
            }
            rows.push(DriftRow {
                asset_class: target.asset_class.clone(),
                target_weight: target.target_weight / target_sum,
                actual_weight: if total_value > 0.0 {
                    actual / total_value
                } else {
                    0.0
                },
                identifiers: target.identifiers.clone(),
            });
        }

        if !has_cash_row {
            rows.push(DriftRow {
                asset_class: CASH_ID.to_string(),
                target_weight: 0.0,
                actual_weight: if total_value > 0.0 {
                    cash / total_value
                } else {
                    0.0
                },
                identifiers: vec![CASH_ID.to_string()],
            });
        }

        // Held but untargeted identifiers still carry weight.
        let mut orphans: Vec<(&str, f64)> = position_values
            .iter()
            .map(|(id, v)| (*id, *v))
            .filter(|(id, _)| !assigned.contains(id))
            .collect();
        orphans.sort_by(|a, b| a.0.cmp(b.0));
        for (id, value) in orphans {
            rows.push(DriftRow {
                asset_class: id.to_string(),
                target_weight: 0.0,
                actual_weight: if total_value > 0.0 {
                    value / total_value
                } else {
                    0.0
                },
                identifiers: vec![id.to_string()],
            });
        }

        Ok(Self { rows, total_value })
    }

    pub fn row(&self, asset_class: &str) -> Option<&DriftRow> {
        self.rows.iter().find(|r| r.asset_class == asset_class)
    }

    /// Row holding the cash pseudo-class, if present.
    pub fn cash_row(&self) -> Option<&DriftRow> {
        self.rows
            .iter()
            .find(|r| r.asset_class == CASH_ID || r.identifiers.iter().any(|i| i == CASH_ID))
    }
}

/// Before/after drift for one asset class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftComparisonRow {
    pub asset_class: String,
    pub target_weight: f64,
    pub weight_before: f64,
    pub weight_after: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftComparison {
    pub rows: Vec<DriftComparisonRow>,
    pub mean_abs_drift_before: f64,
    pub mean_abs_drift_after: f64,
    pub max_abs_drift_before: f64,
    pub max_abs_drift_after: f64,
}

impl DriftComparison {
    pub fn between(before: &DriftReport, after: &DriftReport) -> Self {
        let mut rows = Vec::new();
        let mut abs_before = Vec::new();
        let mut abs_after = Vec::new();

        for b in &before.rows {
            let after_weight = after
                .row(&b.asset_class)
                .map(|r| r.actual_weight)
                .unwrap_or(0.0);
            abs_before.push((b.actual_weight - b.target_weight).abs());
            abs_after.push((after_weight - b.target_weight).abs());
            rows.push(DriftComparisonRow {
                asset_class: b.asset_class.clone(),
                target_weight: b.target_weight,
                weight_before: b.actual_weight,
                weight_after: after_weight,
            });
        }

        let mean = |v: &[f64]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        let max = |v: &[f64]| v.iter().cloned().fold(0.0, f64::max);

        Self {
            mean_abs_drift_before: mean(&abs_before),
            mean_abs_drift_after: mean(&abs_after),
            max_abs_drift_before: max(&abs_before),
            max_abs_drift_after: max(&abs_after),
            rows,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorRow {
    pub factor: String,
    pub target_exposure: f64,
    pub actual_exposure: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorReport {
    pub rows: Vec<FactorRow>,
}

impl FactorReport {
    /// Portfolio factor exposure: value-weighted sum of per-identifier
    /// exposures.
    pub fn compute(
        cash: f64,
        lots: &[TaxLot],
        prices: &Prices,
        model: &FactorModel,
    ) -> Result<Self, EngineError> {
        let mut total_value = cash;
        let mut position_values: HashMap<&str, f64> = HashMap::new();
        for lot in lots {
            let price = prices.require(&lot.identifier)?;
            let value = lot.quantity * price;
            *position_values.entry(lot.identifier.as_str()).or_insert(0.0) += value;
            total_value += value;
        }

        let mut rows = Vec::with_capacity(model.num_factors());
        for (idx, name) in model.factor_names.iter().enumerate() {
            let mut actual = 0.0;
            if total_value > 0.0 {
                for (id, value) in &position_values {
                    actual += (value / total_value) * model.exposure(id, idx);
                }
            }
            rows.push(FactorRow {
                factor: name.clone(),
                target_exposure: model.target_exposures[idx],
                actual_exposure: actual,
            });
        }
        Ok(Self { rows })
    }
}

/// Before/after factor exposures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorComparison {
    pub rows: Vec<FactorComparisonRow>,
    pub mean_abs_deviation_before: f64,
    pub mean_abs_deviation_after: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorComparisonRow {
    pub factor: String,
    pub target_exposure: f64,
    pub exposure_before: f64,
    pub exposure_after: f64,
}

impl FactorComparison {
    pub fn between(before: &FactorReport, after: &FactorReport) -> Self {
        let mut rows = Vec::new();
        let mut dev_before = Vec::new();
        let mut dev_after = Vec::new();
        for b in &before.rows {
            let after_exposure = after
                .rows
                .iter()
                .find(|r| r.factor == b.factor)
                .map(|r| r.actual_exposure)
                .unwrap_or(0.0);
            dev_before.push((b.actual_exposure - b.target_exposure).abs());
            dev_after.push((after_exposure - b.target_exposure).abs());
            rows.push(FactorComparisonRow {
                factor: b.factor.clone(),
                target_exposure: b.target_exposure,
                exposure_before: b.actual_exposure,
                exposure_after: after_exposure,
            });
        }
        let mean = |v: &[f64]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        Self {
            mean_abs_deviation_before: mean(&dev_before),
            mean_abs_deviation_after: mean(&dev_after),
            rows,
        }
    }
}
