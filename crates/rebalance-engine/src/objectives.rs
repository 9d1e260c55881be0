//! Objective manager.
//!
//! The objective is a minimized sum of nonnegative penalty terms - tax,
//! drift, transaction spread, factor tracking, cash drag - with
//! strategy-kind-adjusted weights. Every term divides by total portfolio
//! value (or is already in weight units) so the weights stay dimensionless.

use std::collections::BTreeMap;

use milp_solver::{LinExpr, Problem, Sense};
use rebalance_core::{DriftReport, FactorReport, GainType, Strategy, TaxRates, Weights, CASH_ID};
use tracing::debug;

use crate::piecewise::{piecewise_deviation_cost, piecewise_deviation_value};
use crate::settings::OptimizationSettings;
use crate::variables::{ProgramVariables, SellVar};

pub const TAX_NORMALIZATION: f64 = 1.0;
pub const DRIFT_NORMALIZATION: f64 = 1.0;
pub const TRANSACTION_NORMALIZATION: f64 = 1.0;
pub const FACTOR_MODEL_NORMALIZATION: f64 = 1.0;
pub const CASH_DRAG_NORMALIZATION: f64 = 1.0;

/// Extra reward multiplier on qualifying harvested losses.
const TLH_BONUS: f64 = 0.5;

pub struct ObjectiveContext<'a> {
    pub strategy: &'a Strategy,
    pub settings: &'a OptimizationSettings,
    pub drift: &'a DriftReport,
    pub factor: Option<&'a FactorReport>,
    pub tax_rates: &'a TaxRates,
    pub total_value: f64,
    /// Weights after the strategy kind's adjustment.
    pub weights: Weights,
}

impl<'a> ObjectiveContext<'a> {
    pub fn new(
        strategy: &'a Strategy,
        settings: &'a OptimizationSettings,
        drift: &'a DriftReport,
        factor: Option<&'a FactorReport>,
        tax_rates: &'a TaxRates,
        total_value: f64,
    ) -> Self {
        let weights = strategy.kind.adjust_weights(Weights {
            tax: settings.weight_tax,
            drift: settings.weight_drift,
            transaction: settings.weight_transaction,
            factor_model: settings.weight_factor_model,
            cash_drag: settings.weight_cash_drag,
        });
        Self {
            strategy,
            settings,
            drift,
            factor,
            tax_rates,
            total_value,
            weights,
        }
    }

    fn mean_target_weight(&self) -> f64 {
        if self.drift.rows.is_empty() {
            return 1.0;
        }
        self.drift
            .rows
            .iter()
            .map(|r| r.target_weight)
            .sum::<f64>()
            / self.drift.rows.len() as f64
    }

    fn factor_scale(&self) -> f64 {
        match self.factor {
            Some(report) if !report.rows.is_empty() => {
                let mean = report
                    .rows
                    .iter()
                    .map(|r| r.target_exposure.abs())
                    .sum::<f64>()
                    / report.rows.len() as f64;
                if mean > 0.0 {
                    mean
                } else {
                    1.0
                }
            }
            _ => 1.0,
        }
    }
}

/// Per-share objective coefficient for selling one share of a lot.
///
/// Gains cost their tax. Losses are free unless the strategy harvests, in
/// which case they pay back their tax savings, with a bonus once the loss
/// is deep enough to qualify as a harvest.
fn sell_tax_coefficient(sell: &SellVar, ctx: &ObjectiveContext<'_>) -> f64 {
    let unit_gain = sell.price - sell.unit_cost_basis;
    let mut rate = sell.sell_tax_rate;
    if unit_gain > 0.0 {
        rate += ctx.tax_rates.niit;
    }
    let coefficient = rate * unit_gain;
    if coefficient >= 0.0 {
        return coefficient;
    }
    if !ctx.settings.should_tlh {
        return 0.0;
    }
    let qualifies =
        unit_gain <= -ctx.settings.tlh_min_loss_threshold * sell.unit_cost_basis;
    if qualifies {
        coefficient * (1.0 + TLH_BONUS)
    } else {
        coefficient
    }
}

/// Builds the combined objective and remembers each component so its value
/// can be read back from a solution.
pub struct ObjectiveManager {
    components: Vec<(&'static str, LinExpr)>,
}

impl ObjectiveManager {
    /// Assemble all active terms, set the problem objective, and return the
    /// manager for later component extraction.
    pub fn build(
        problem: &mut Problem,
        vars: &ProgramVariables,
        ctx: &ObjectiveContext<'_>,
    ) -> Self {
        let mut components: Vec<(&'static str, LinExpr)> = Vec::new();

        if ctx.weights.tax > 0.0 && ctx.total_value > 0.0 {
            components.push(("tax", Self::tax_term(vars, ctx)));
        }
        if ctx.weights.drift > 0.0 {
            components.push(("drift", Self::drift_term(problem, vars, ctx)));
        }
        if ctx.weights.transaction > 0.0 && ctx.total_value > 0.0 {
            components.push(("transaction", Self::transaction_term(vars, ctx)));
        }
        if ctx.weights.factor_model > 0.0 && ctx.factor.is_some() {
            components.push(("factor_model", Self::factor_term(problem, vars, ctx)));
        }
        if ctx.weights.cash_drag > 0.0
            && ctx.strategy.withdrawal_amount <= 0.0
            && ctx.total_value > 0.0
        {
            components.push(("cash_drag", Self::cash_drag_term(problem, vars, ctx)));
        }

        let mut combined = LinExpr::new();
        for (_, expr) in &components {
            combined.add_expr(expr);
        }
        problem.set_objective(combined);

        debug!(
            terms = components.len(),
            "objective assembled"
        );
        Self { components }
    }

    fn tax_term(vars: &ProgramVariables, ctx: &ObjectiveContext<'_>) -> LinExpr {
        let scale = ctx.weights.tax * TAX_NORMALIZATION / ctx.total_value;
        let mut expr = LinExpr::new();
        for sell in &vars.sells {
            let coefficient = sell_tax_coefficient(sell, ctx);
            if coefficient != 0.0 {
                expr.add_term(sell.var, coefficient * scale);
            }
        }
        expr
    }

    fn drift_term(
        problem: &mut Problem,
        vars: &ProgramVariables,
        ctx: &ObjectiveContext<'_>,
    ) -> LinExpr {
        let normalization = ctx.weights.drift * DRIFT_NORMALIZATION;
        let mean_target = ctx.mean_target_weight();
        let mut expr = LinExpr::new();

        for row in &ctx.drift.rows {
            if row.asset_class == CASH_ID || row.identifiers.iter().any(|i| i == CASH_ID) {
                continue;
            }
            let mut deviation = LinExpr::constant(row.actual_weight - row.target_weight);
            if ctx.total_value > 0.0 {
                for identifier in &row.identifiers {
                    if let Some(buy) = vars.buy_for(identifier) {
                        deviation.add_term(buy.var, buy.price / ctx.total_value);
                    }
                    for sell in vars.sells_for(identifier) {
                        deviation.add_term(sell.var, -sell.price / ctx.total_value);
                    }
                }
            }
            let cost = piecewise_deviation_cost(
                problem,
                &format!("drift_{}", row.asset_class),
                &deviation,
                mean_target,
                normalization,
            );
            expr.add_expr(&cost);
        }

        // Prefer primary securities: penalize buys and reward sells of
        // alternates, scaled by their rank in the class.
        if ctx.settings.rank_penalty_factor > 0.0 && ctx.total_value > 0.0 {
            for row in &ctx.drift.rows {
                if row.asset_class == CASH_ID || row.identifiers.iter().any(|i| i == CASH_ID) {
                    continue;
                }
                for (rank, identifier) in row.identifiers.iter().enumerate().skip(1) {
                    let factor = ctx.settings.rank_penalty_factor * rank as f64;
                    if let Some(buy) = vars.buy_for(identifier) {
                        expr.add_term(buy.var, factor * buy.price / ctx.total_value);
                    }
                    for sell in vars.sells_for(identifier) {
                        expr.add_term(sell.var, -factor * sell.price / ctx.total_value);
                    }
                }
            }
        }

        expr
    }

    fn transaction_term(vars: &ProgramVariables, ctx: &ObjectiveContext<'_>) -> LinExpr {
        let scale = ctx.weights.transaction * TRANSACTION_NORMALIZATION / ctx.total_value;
        let mut expr = LinExpr::new();
        for buy in &vars.buys {
            let cost = buy.price * buy.spread;
            if cost > 0.0 {
                expr.add_term(buy.var, cost * scale);
            }
        }
        for sell in &vars.sells {
            let cost = sell.price * sell.spread;
            if cost > 0.0 {
                expr.add_term(sell.var, cost * scale);
            }
        }
        expr
    }

    fn factor_term(
        problem: &mut Problem,
        vars: &ProgramVariables,
        ctx: &ObjectiveContext<'_>,
    ) -> LinExpr {
        let (Some(report), Some(model)) = (ctx.factor, ctx.strategy.factor_model.as_ref()) else {
            return LinExpr::new();
        };
        let normalization = ctx.weights.factor_model * FACTOR_MODEL_NORMALIZATION;
        let scale = ctx.factor_scale();
        let mut expr = LinExpr::new();

        for (idx, row) in report.rows.iter().enumerate() {
            let mut deviation =
                LinExpr::constant(row.actual_exposure - row.target_exposure);
            if ctx.total_value > 0.0 {
                for buy in &vars.buys {
                    let beta = model.exposure(&buy.identifier, idx);
                    if beta != 0.0 {
                        deviation.add_term(buy.var, beta * buy.price / ctx.total_value);
                    }
                }
                for sell in &vars.sells {
                    let beta = model.exposure(&sell.identifier, idx);
                    if beta != 0.0 {
                        deviation.add_term(sell.var, -beta * sell.price / ctx.total_value);
                    }
                }
            }
            let cost = piecewise_deviation_cost(
                problem,
                &format!("factor_{}", row.factor),
                &deviation,
                scale,
                normalization,
            );
            expr.add_expr(&cost);
        }
        expr
    }

    /// Penalize cash parked above the floor when there is no withdrawal.
    fn cash_drag_term(
        problem: &mut Problem,
        vars: &ProgramVariables,
        ctx: &ObjectiveContext<'_>,
    ) -> LinExpr {
        let excess = problem.add_var("cash_excess", 0.0, f64::INFINITY);
        // excess >= cash_after - min_cash
        let mut floor = LinExpr::term(excess, 1.0);
        for sell in &vars.sells {
            floor.add_term(sell.var, -sell.price * (1.0 - sell.spread));
        }
        for buy in &vars.buys {
            floor.add_term(buy.var, buy.price * (1.0 + buy.spread));
        }
        problem.add_constraint(
            "cash_excess_floor",
            floor,
            Sense::Ge,
            ctx.strategy.cash - ctx.strategy.min_cash,
        );
        LinExpr::term(
            excess,
            ctx.weights.cash_drag * CASH_DRAG_NORMALIZATION / ctx.total_value,
        )
    }

    /// Component values at a solved assignment, plus the total.
    pub fn component_values(&self, values: &[f64]) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        let mut total = 0.0;
        for (name, expr) in &self.components {
            let value = expr.value(values);
            total += value;
            out.insert((*name).to_string(), value);
        }
        out.insert("overall".to_string(), total);
        out
    }

    /// Objective components with every decision variable at zero, in closed
    /// form. This is the no-trade baseline; no solve is needed because the
    /// auxiliary variables of each term collapse to their defining values.
    pub fn baseline_components(ctx: &ObjectiveContext<'_>) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        let mut total = 0.0;

        if ctx.weights.tax > 0.0 && ctx.total_value > 0.0 {
            out.insert("tax".to_string(), 0.0);
        }
        if ctx.weights.drift > 0.0 {
            let mean_target = ctx.mean_target_weight();
            let normalization = ctx.weights.drift * DRIFT_NORMALIZATION;
            let mut drift_value = 0.0;
            for row in &ctx.drift.rows {
                if row.asset_class == CASH_ID || row.identifiers.iter().any(|i| i == CASH_ID) {
                    continue;
                }
                drift_value += piecewise_deviation_value(
                    row.actual_weight - row.target_weight,
                    mean_target,
                    normalization,
                );
            }
            total += drift_value;
            out.insert("drift".to_string(), drift_value);
        }
        if ctx.weights.transaction > 0.0 && ctx.total_value > 0.0 {
            out.insert("transaction".to_string(), 0.0);
        }
        if ctx.weights.factor_model > 0.0 {
            if let Some(report) = ctx.factor {
                let normalization = ctx.weights.factor_model * FACTOR_MODEL_NORMALIZATION;
                let scale = ctx.factor_scale();
                let mut factor_value = 0.0;
                for row in &report.rows {
                    factor_value += piecewise_deviation_value(
                        row.actual_exposure - row.target_exposure,
                        scale,
                        normalization,
                    );
                }
                total += factor_value;
                out.insert("factor_model".to_string(), factor_value);
            }
        }
        if ctx.weights.cash_drag > 0.0
            && ctx.strategy.withdrawal_amount <= 0.0
            && ctx.total_value > 0.0
        {
            let excess = (ctx.strategy.cash - ctx.strategy.min_cash).max(0.0);
            let value = excess * ctx.weights.cash_drag * CASH_DRAG_NORMALIZATION
                / ctx.total_value;
            total += value;
            out.insert("cash_drag".to_string(), value);
        }

        out.insert("overall".to_string(), total);
        out
    }

    pub fn baseline_value(ctx: &ObjectiveContext<'_>) -> f64 {
        Self::baseline_components(ctx)
            .get("overall")
            .copied()
            .unwrap_or(0.0)
    }
}

/// Whether a sell realizes a qualifying harvested loss.
pub fn is_tlh_sell(
    unit_gain: f64,
    unit_cost_basis: f64,
    gain_type: GainType,
    settings: &OptimizationSettings,
) -> bool {
    if unit_gain >= 0.0 {
        return false;
    }
    if settings.should_tlh {
        return true;
    }
    gain_type == GainType::ShortTerm
        && unit_gain <= -settings.tlh_min_loss_threshold * unit_cost_basis
}
