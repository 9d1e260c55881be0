//! Wire format of the optimization response.

use std::collections::BTreeMap;

use serde::Serialize;

use rebalance_core::Trade;
use rebalance_engine::{MaxWithdrawalResult, OptimizationStatus, TradeSummary};

#[derive(Debug, Serialize)]
pub struct Response {
    pub version: String,
    pub results: BTreeMap<String, StrategyResultOutput>,
    pub netted_trades: Vec<Trade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_withdrawal_amount_results: Option<BTreeMap<String, MaxWithdrawalOutput>>,
}

#[derive(Debug, Serialize)]
pub struct StrategyResultOutput {
    pub label: Option<String>,
    pub status: Option<OptimizationStatus>,
    pub should_trade: bool,
    pub trades: Vec<Trade>,
    pub trade_summary: TradeSummary,
}

#[derive(Debug, Serialize)]
pub struct MaxWithdrawalOutput {
    pub max_withdrawal: f64,
    pub trades: Vec<Trade>,
}

impl From<MaxWithdrawalResult> for MaxWithdrawalOutput {
    fn from(result: MaxWithdrawalResult) -> Self {
        Self {
            max_withdrawal: result.max_withdrawal,
            trades: result.trades,
        }
    }
}
