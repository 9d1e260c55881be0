//! Per-strategy optimization settings as they arrive on the wire.

use serde::{Deserialize, Serialize};

fn default_weight_on() -> f64 {
    1.0
}

fn default_range_min() -> f64 {
    0.5
}

fn default_range_max() -> f64 {
    2.0
}

fn default_tlh_min_loss_threshold() -> f64 {
    0.015
}

fn default_enforce_wash_sale() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSettings {
    #[serde(default = "default_weight_on")]
    pub weight_tax: f64,
    #[serde(default = "default_weight_on")]
    pub weight_drift: f64,
    #[serde(default = "default_weight_on")]
    pub weight_transaction: f64,
    #[serde(default)]
    pub weight_factor_model: f64,
    #[serde(default)]
    pub weight_cash_drag: f64,
    /// Minimum improvement over the baseline before a rebalance executes.
    /// `None` accepts any optimal solution.
    #[serde(default)]
    pub rebalance_threshold: Option<f64>,
    /// Minimum improvement for the buy-only fallback.
    #[serde(default)]
    pub buy_threshold: Option<f64>,
    #[serde(default)]
    pub holding_time_days: i64,
    #[serde(default)]
    pub min_notional: f64,
    #[serde(default = "default_range_min")]
    pub range_min_weight_multiplier: f64,
    #[serde(default = "default_range_max")]
    pub range_max_weight_multiplier: f64,
    #[serde(default)]
    pub rank_penalty_factor: f64,
    #[serde(default = "default_enforce_wash_sale")]
    pub enforce_wash_sale_prevention: bool,
    #[serde(default)]
    pub should_tlh: bool,
    #[serde(default = "default_tlh_min_loss_threshold")]
    pub tlh_min_loss_threshold: f64,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            weight_tax: 1.0,
            weight_drift: 1.0,
            weight_transaction: 1.0,
            weight_factor_model: 0.0,
            weight_cash_drag: 0.0,
            rebalance_threshold: None,
            buy_threshold: None,
            holding_time_days: 0,
            min_notional: 0.0,
            range_min_weight_multiplier: 0.5,
            range_max_weight_multiplier: 2.0,
            rank_penalty_factor: 0.0,
            enforce_wash_sale_prevention: true,
            should_tlh: false,
            tlh_min_loss_threshold: 0.015,
        }
    }
}
