//! Solver driver: baseline, rebalance solve, buy-only fallback.
//!
//! The decision flow is an explicit state machine. Every no-trade outcome
//! carries a structured explanation context naming the gating case and the
//! measured improvements, so callers never reconstruct the story from logs.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use milp_solver::{solve_milp, Problem, SolveResult};
use rebalance_core::{
    DriftComparison, EngineError, FactorComparison, StockRestriction, Strategy, TaxRates, Trade,
    WashSaleRestrictions,
};

use crate::constraints::{apply_constraints, ConstraintContext, SolveMode};
use crate::objectives::{ObjectiveContext, ObjectiveManager};
use crate::settings::OptimizationSettings;
use crate::summary::{OptimizationInfo, TradeSummary};
use crate::trades::synthesize_trades;
use crate::variables::ProgramVariables;

/// Solver status as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizationStatus {
    Optimal,
    Infeasible,
    Unbounded,
    NoSolution,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optimal => "OPTIMAL",
            Self::Infeasible => "INFEASIBLE",
            Self::Unbounded => "UNBOUNDED",
            Self::NoSolution => "NO_SOLUTION",
        }
    }

    fn from_solve(result: &SolveResult) -> Self {
        match result {
            SolveResult::Optimal { .. } => Self::Optimal,
            SolveResult::Infeasible => Self::Infeasible,
            SolveResult::Unbounded => Self::Unbounded,
            SolveResult::IterationLimit => Self::NoSolution,
        }
    }
}

/// Why a run produced no trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoTradeCase {
    BuyOnlyFailed,
    BuyOnlyBelowThreshold,
    OptimizationFailed,
    HoldStrategy,
    EmptyPortfolio,
    NoTradeFailed,
    NotEnoughCashToBuyOnly,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ImprovementMeasure {
    pub value: f64,
    pub threshold: Option<f64>,
}

/// Structured context behind a no-trade outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ExplanationContext {
    pub case_type: NoTradeCase,
    pub improvements: BTreeMap<String, ImprovementMeasure>,
    pub optimization_status: Option<OptimizationStatus>,
    pub additional_info: BTreeMap<String, f64>,
}

impl ExplanationContext {
    fn new(case_type: NoTradeCase) -> Self {
        Self {
            case_type,
            improvements: BTreeMap::new(),
            optimization_status: None,
            additional_info: BTreeMap::new(),
        }
    }
}

/// Account-level inputs shared by all strategies in a run.
pub struct StrategyContext<'a> {
    pub current_date: NaiveDate,
    pub tax_rates: &'a TaxRates,
    pub stock_restrictions: &'a [StockRestriction],
    pub wash_sales: Option<&'a WashSaleRestrictions>,
}

/// Per-strategy outcome.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub status: Option<OptimizationStatus>,
    pub should_trade: bool,
    pub trades: Vec<Trade>,
    pub trade_summary: TradeSummary,
}

impl StrategyResult {
    /// The empty result recorded when a strategy's solve errors out; the
    /// account run keeps going.
    pub fn failed() -> Self {
        Self {
            status: None,
            should_trade: false,
            trades: Vec::new(),
            trade_summary: TradeSummary::default(),
        }
    }
}

pub(crate) struct BuiltProgram {
    pub problem: Problem,
    pub vars: ProgramVariables,
    pub manager: ObjectiveManager,
}

pub(crate) fn build_program(
    strategy: &Strategy,
    settings: &OptimizationSettings,
    ctx: &StrategyContext<'_>,
    mode: SolveMode,
) -> Result<BuiltProgram, EngineError> {
    let total_value = strategy.total_value()?;
    let drift = strategy.drift_report()?;
    let factor = strategy.factor_report()?;
    let gain_loss = strategy.gain_loss_report(ctx.current_date, ctx.tax_rates)?;

    let mut problem = Problem::new();
    let vars = ProgramVariables::build(&mut problem, strategy, &gain_loss, total_value)?;

    let constraint_ctx = ConstraintContext {
        strategy,
        settings,
        drift: &drift,
        stock_restrictions: ctx.stock_restrictions,
        wash_sales: ctx.wash_sales,
        total_value,
        mode,
    };
    apply_constraints(&mut problem, &vars, &constraint_ctx);

    let objective_ctx = ObjectiveContext::new(
        strategy,
        settings,
        &drift,
        factor.as_ref(),
        ctx.tax_rates,
        total_value,
    );
    let manager = ObjectiveManager::build(&mut problem, &vars, &objective_ctx);

    Ok(BuiltProgram {
        problem,
        vars,
        manager,
    })
}

fn no_trade_result(
    status: Option<OptimizationStatus>,
    context: ExplanationContext,
    mut optimization_info: OptimizationInfo,
    settings: &OptimizationSettings,
) -> StrategyResult {
    optimization_info.rebalance_threshold = settings.rebalance_threshold;
    optimization_info.buy_threshold = settings.buy_threshold;
    StrategyResult {
        status,
        should_trade: false,
        trades: Vec::new(),
        trade_summary: TradeSummary::for_no_trade(&context, optimization_info),
    }
}

fn accept_result(
    strategy: &Strategy,
    settings: &OptimizationSettings,
    ctx: &StrategyContext<'_>,
    built: &BuiltProgram,
    values: &[f64],
    baseline: BTreeMap<String, f64>,
    improvement: f64,
    is_buy_only: bool,
) -> Result<StrategyResult, EngineError> {
    let trades = synthesize_trades(strategy, &built.vars, values, settings);
    let after = built.manager.component_values(values);

    let mut optimization_info = OptimizationInfo::with_components(baseline, Some(after));
    optimization_info.improvement = Some(improvement);
    optimization_info.rebalance_threshold = settings.rebalance_threshold;
    optimization_info.buy_threshold = settings.buy_threshold;
    optimization_info.is_2nd_buy_only_optimization = is_buy_only;

    let post = strategy.apply_trades(&trades, ctx.current_date)?;
    let drift_comparison = DriftComparison::between(&strategy.drift_report()?, &post.drift_report()?);
    let factor_comparison = match (strategy.factor_report()?, post.factor_report()?) {
        (Some(before), Some(after)) => Some(FactorComparison::between(&before, &after)),
        _ => None,
    };

    let should_trade = !trades.is_empty();
    let trade_summary = TradeSummary::for_trades(
        strategy,
        &trades,
        Some(drift_comparison),
        factor_comparison,
        optimization_info,
    );

    Ok(StrategyResult {
        status: Some(OptimizationStatus::Optimal),
        should_trade,
        trades,
        trade_summary,
    })
}

/// Run the baseline / rebalance / buy-only sequence for one strategy.
pub fn optimize_strategy(
    strategy: &Strategy,
    settings: &OptimizationSettings,
    ctx: &StrategyContext<'_>,
) -> Result<StrategyResult, EngineError> {
    if strategy.kind.is_hold() {
        info!(strategy_id = strategy.strategy_id, "hold strategy, no solve");
        return Ok(no_trade_result(
            None,
            ExplanationContext::new(NoTradeCase::HoldStrategy),
            OptimizationInfo::default(),
            settings,
        ));
    }
    if strategy.is_empty() {
        info!(strategy_id = strategy.strategy_id, "empty portfolio");
        return Ok(no_trade_result(
            None,
            ExplanationContext::new(NoTradeCase::EmptyPortfolio),
            OptimizationInfo::default(),
            settings,
        ));
    }

    // Baseline: every variable at zero, evaluated in closed form.
    let total_value = strategy.total_value()?;
    let drift = strategy.drift_report()?;
    let factor = strategy.factor_report()?;
    let objective_ctx = ObjectiveContext::new(
        strategy,
        settings,
        &drift,
        factor.as_ref(),
        ctx.tax_rates,
        total_value,
    );
    let baseline = ObjectiveManager::baseline_components(&objective_ctx);
    let baseline_value = baseline.get("overall").copied().unwrap_or(0.0);
    if !baseline_value.is_finite() {
        warn!(strategy_id = strategy.strategy_id, "baseline not finite");
        return Ok(no_trade_result(
            None,
            ExplanationContext::new(NoTradeCase::NoTradeFailed),
            OptimizationInfo::with_components(baseline, None),
            settings,
        ));
    }

    // Rebalance solve.
    let built = build_program(strategy, settings, ctx, SolveMode::Rebalance)?;
    let rebalance_outcome = solve_milp(&built.problem);
    let rebalance_status = OptimizationStatus::from_solve(&rebalance_outcome);

    let mut improvements: BTreeMap<String, ImprovementMeasure> = BTreeMap::new();

    if let SolveResult::Optimal { objective, values } = &rebalance_outcome {
        let improvement = baseline_value - objective;
        improvements.insert(
            "rebalance".to_string(),
            ImprovementMeasure {
                value: improvement,
                threshold: settings.rebalance_threshold,
            },
        );
        let meets_threshold = settings
            .rebalance_threshold
            .map(|t| improvement >= t)
            .unwrap_or(true);
        if meets_threshold {
            info!(
                strategy_id = strategy.strategy_id,
                improvement, "rebalance accepted"
            );
            return accept_result(
                strategy, settings, ctx, &built, values, baseline, improvement, false,
            );
        }
        info!(
            strategy_id = strategy.strategy_id,
            improvement, "rebalance below threshold"
        );
    } else {
        warn!(
            strategy_id = strategy.strategy_id,
            status = rebalance_status.as_str(),
            "rebalance solve failed"
        );
    }

    // Buy-only fallback, gated on having cash to deploy.
    let cash_needed = strategy.min_cash + settings.min_notional;
    if strategy.cash < cash_needed {
        let mut context = ExplanationContext::new(NoTradeCase::NotEnoughCashToBuyOnly);
        context.improvements = improvements;
        context.optimization_status = Some(rebalance_status);
        context
            .additional_info
            .insert("actual_cash".to_string(), strategy.cash);
        context
            .additional_info
            .insert("min_cash".to_string(), cash_needed);
        return Ok(no_trade_result(
            Some(rebalance_status),
            context,
            OptimizationInfo::with_components(baseline, None),
            settings,
        ));
    }

    let buy_only = build_program(strategy, settings, ctx, SolveMode::BuyOnly)?;
    let buy_only_outcome = solve_milp(&buy_only.problem);
    let buy_only_status = OptimizationStatus::from_solve(&buy_only_outcome);

    match &buy_only_outcome {
        SolveResult::Optimal { objective, values } => {
            let improvement = baseline_value - objective;
            improvements.insert(
                "buy_only".to_string(),
                ImprovementMeasure {
                    value: improvement,
                    threshold: settings.buy_threshold,
                },
            );
            let meets_threshold = settings
                .buy_threshold
                .map(|t| improvement >= t)
                .unwrap_or(true);
            if meets_threshold {
                info!(
                    strategy_id = strategy.strategy_id,
                    improvement, "buy-only accepted"
                );
                return accept_result(
                    strategy, settings, ctx, &buy_only, values, baseline, improvement, true,
                );
            }
            let mut context = ExplanationContext::new(NoTradeCase::BuyOnlyBelowThreshold);
            context.improvements = improvements;
            context.optimization_status = Some(buy_only_status);
            Ok(no_trade_result(
                Some(buy_only_status),
                context,
                OptimizationInfo::with_components(baseline, None),
                settings,
            ))
        }
        _ => {
            // Neither pass produced a usable plan. If the rebalance never
            // solved either, the run as a whole failed.
            let case = if improvements.contains_key("rebalance") {
                NoTradeCase::BuyOnlyFailed
            } else {
                NoTradeCase::OptimizationFailed
            };
            let mut context = ExplanationContext::new(case);
            context.improvements = improvements;
            context.optimization_status = Some(buy_only_status);
            Ok(no_trade_result(
                Some(buy_only_status),
                context,
                OptimizationInfo::with_components(baseline, None),
                settings,
            ))
        }
    }
}
