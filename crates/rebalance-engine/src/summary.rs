//! Trade summary: execution totals, realized gains, drift and factor
//! movement, optimization components, and the human-readable explanation.
//!
//! Explanations are rendered from structured context by one deterministic
//! function; decision sites never build strings themselves.

use std::collections::BTreeMap;

use serde::Serialize;

use rebalance_core::{
    DriftComparison, FactorComparison, GainType, Strategy, Trade, TradeSide,
};

use crate::solver::{ExplanationContext, NoTradeCase};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub num_buys: usize,
    pub num_sells: usize,
    pub total_buys_value: f64,
    pub total_sells_value: f64,
    pub total_trades: usize,
    pub total_value: f64,
}

impl ExecutionSummary {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let mut summary = Self::default();
        for trade in trades {
            match trade.side {
                TradeSide::Buy => {
                    summary.num_buys += 1;
                    summary.total_buys_value += trade.notional();
                }
                TradeSide::Sell => {
                    summary.num_sells += 1;
                    summary.total_sells_value += trade.notional();
                }
            }
        }
        summary.total_trades = trades.len();
        summary.total_value = summary.total_buys_value + summary.total_sells_value;
        summary
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GainLossSummary {
    pub short_term_gains: f64,
    pub short_term_losses: f64,
    pub long_term_gains: f64,
    pub long_term_losses: f64,
    pub total_gains: f64,
    pub total_losses: f64,
    pub net_gain_loss: f64,
}

impl GainLossSummary {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let mut summary = Self::default();
        for trade in trades {
            let (Some(gain), Some(gain_type)) = (trade.realized_gain, trade.gain_type) else {
                continue;
            };
            if gain > 0.0 {
                match gain_type {
                    GainType::ShortTerm => summary.short_term_gains += gain,
                    GainType::LongTerm => summary.long_term_gains += gain,
                }
            } else {
                match gain_type {
                    GainType::ShortTerm => summary.short_term_losses += gain.abs(),
                    GainType::LongTerm => summary.long_term_losses += gain.abs(),
                }
            }
        }
        summary.total_gains = summary.short_term_gains + summary.long_term_gains;
        summary.total_losses = summary.short_term_losses + summary.long_term_losses;
        summary.net_gain_loss = summary.total_gains - summary.total_losses;
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentImprovement {
    pub absolute: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationInfo {
    pub before_optimization: BTreeMap<String, f64>,
    pub after_optimization: Option<BTreeMap<String, f64>>,
    pub component_improvements: BTreeMap<String, ComponentImprovement>,
    pub improvement: Option<f64>,
    pub rebalance_threshold: Option<f64>,
    pub buy_threshold: Option<f64>,
    pub is_2nd_buy_only_optimization: bool,
}

impl OptimizationInfo {
    pub fn with_components(
        before: BTreeMap<String, f64>,
        after: Option<BTreeMap<String, f64>>,
    ) -> Self {
        let mut info = Self {
            before_optimization: before,
            after_optimization: after,
            ..Self::default()
        };
        if let Some(after) = &info.after_optimization {
            for (key, before_value) in &info.before_optimization {
                let Some(after_value) = after.get(key) else {
                    continue;
                };
                let absolute = before_value - after_value;
                let percent = if *before_value != 0.0 {
                    absolute / before_value.abs() * 100.0
                } else {
                    0.0
                };
                info.component_improvements
                    .insert(key.clone(), ComponentImprovement { absolute, percent });
            }
        }
        info
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeSummary {
    pub execution: ExecutionSummary,
    pub gain_loss: GainLossSummary,
    pub drift: Option<DriftComparison>,
    pub factor_model: Option<FactorComparison>,
    pub optimization_info: OptimizationInfo,
    pub explanation: String,
}

impl TradeSummary {
    /// Summary for an accepted trade plan.
    pub fn for_trades(
        strategy: &Strategy,
        trades: &[Trade],
        drift: Option<DriftComparison>,
        factor_model: Option<FactorComparison>,
        optimization_info: OptimizationInfo,
    ) -> Self {
        let execution = ExecutionSummary::from_trades(trades);
        let gain_loss = GainLossSummary::from_trades(trades);
        let explanation = render_trade_explanation(
            strategy,
            trades,
            &execution,
            &gain_loss,
            optimization_info.is_2nd_buy_only_optimization,
        );
        Self {
            execution,
            gain_loss,
            drift,
            factor_model,
            optimization_info,
            explanation,
        }
    }

    /// Summary for a no-trade outcome.
    pub fn for_no_trade(
        context: &ExplanationContext,
        optimization_info: OptimizationInfo,
    ) -> Self {
        Self {
            explanation: render_explanation_from_context(context),
            optimization_info,
            ..Self::default()
        }
    }
}

fn format_improvement(value: f64, threshold: f64) -> String {
    format!(
        "the improvement of {:.4} was less than the required threshold of {:.4}",
        value, threshold
    )
}

/// Deterministic no-trade explanation from structured context.
pub fn render_explanation_from_context(context: &ExplanationContext) -> String {
    let mut parts: Vec<String> = Vec::new();

    let rebalance_part = context.improvements.get("rebalance").map(|m| {
        format!(
            "We tried to rebalance, but {}.",
            format_improvement(m.value, m.threshold.unwrap_or(0.0))
        )
    });

    match context.case_type {
        NoTradeCase::BuyOnlyFailed => {
            if let Some(part) = rebalance_part {
                parts.push(part);
            }
            parts.push(
                "We then tried a buy-only optimization, but it failed to find a feasible solution."
                    .to_string(),
            );
        }
        NoTradeCase::BuyOnlyBelowThreshold => {
            if let Some(part) = rebalance_part {
                parts.push(part);
            }
            if let Some(m) = context.improvements.get("buy_only") {
                parts.push(format!(
                    "We tried a buy-only optimization, but {}.",
                    format_improvement(m.value, m.threshold.unwrap_or(0.0))
                ));
            }
        }
        NoTradeCase::OptimizationFailed => {
            let status = context
                .optimization_status
                .map(|s| format!(" (Status: {})", s.as_str()))
                .unwrap_or_default();
            parts.push(format!(
                "The optimization problem could not be solved{}. This may be due to conflicting constraints or numerical issues.",
                status
            ));
        }
        NoTradeCase::HoldStrategy => {
            parts.push("No trades were executed as this is a HOLD strategy.".to_string());
        }
        NoTradeCase::EmptyPortfolio => {
            parts.push(
                "No trades were executed as the portfolio is empty and there are no non-cash targets."
                    .to_string(),
            );
        }
        NoTradeCase::NoTradeFailed => {
            parts.push(
                "The no-trades scenario failed to solve, indicating a problem with the optimization setup."
                    .to_string(),
            );
        }
        NoTradeCase::NotEnoughCashToBuyOnly => {
            if let Some(part) = rebalance_part {
                parts.push(part);
            }
            let actual_cash = context.additional_info.get("actual_cash").unwrap_or(&0.0);
            let min_cash = context.additional_info.get("min_cash").unwrap_or(&0.0);
            parts.push(format!(
                "We then considered a buy-only optimization, but there wasn't enough cash (${:.2}) to meet the minimum requirement (${:.2}).",
                actual_cash, min_cash
            ));
        }
    }

    parts.join(" ")
}

fn render_trade_explanation(
    strategy: &Strategy,
    trades: &[Trade],
    execution: &ExecutionSummary,
    gain_loss: &GainLossSummary,
    is_2nd_buy_only: bool,
) -> String {
    if trades.is_empty() {
        if is_2nd_buy_only {
            return "No trades were executed as we decided to skip rebalancing and found no beneficial buy opportunities.".to_string();
        }
        return "No trades were executed as no beneficial trades were identified.".to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    if is_2nd_buy_only {
        parts.push(
            "After deciding to skip rebalancing, we identified the following buy opportunities:"
                .to_string(),
        );
    }

    let mut summary_parts: Vec<String> = Vec::new();
    if execution.num_buys > 0 {
        summary_parts.push(format!(
            "buying ${:.2} worth of {} securities",
            execution.total_buys_value, execution.num_buys
        ));
    }
    if execution.num_sells > 0 {
        summary_parts.push(format!(
            "selling ${:.2} worth of {} lots",
            execution.total_sells_value, execution.num_sells
        ));
    }
    if !summary_parts.is_empty() {
        parts.push(format!("{}.", summary_parts.join(" and ")));
    }

    if execution.num_sells > 0 {
        let tlh_lots = trades
            .iter()
            .filter(|t| t.is_tlh == Some(true))
            .count();
        if gain_loss.total_losses > 0.0 {
            parts.push(format!(
                "Realized losses total ${:.2}.",
                gain_loss.total_losses
            ));
        }
        if gain_loss.total_gains > 0.0 {
            parts.push(format!(
                "Realized gains total ${:.2}.",
                gain_loss.total_gains
            ));
        }
        if tlh_lots > 0 {
            parts.push(format!(
                "{} of the sells are tax-loss harvesting trades.",
                tlh_lots
            ));
        }
    }

    parts.push(format!(
        "Strategy cash before trades: ${:.2}.",
        strategy.cash
    ));

    parts.join(" ")
}
