//! Two-phase dense tableau simplex.
//!
//! Pivot selection uses Bland's rule (smallest index) throughout, which
//! rules out cycling and makes every solve deterministic. Variables with
//! equal bounds are folded into the right-hand side before the tableau is
//! built, so pinned variables cost nothing.

use nalgebra::DMatrix;
use tracing::trace;

use crate::problem::{Problem, Sense, SolveResult};

const EPS: f64 = 1e-9;
const FEAS_EPS: f64 = 1e-7;
const MAX_ITERATIONS: usize = 50_000;

/// Solve the LP relaxation of `problem` (binary flags ignored).
pub fn solve_lp(problem: &Problem) -> SolveResult {
    Tableau::build(problem)
        .map(|t| t.solve(problem))
        .unwrap_or(SolveResult::Infeasible)
}

struct Tableau {
    /// m x (total_cols + 1); last column is the rhs.
    t: DMatrix<f64>,
    /// Basis column index per row.
    basis: Vec<usize>,
    /// Column index per free structural variable, parallel to `var_of_col`.
    col_of_var: Vec<Option<usize>>,
    var_of_col: Vec<usize>,
    num_structural: usize,
    artificial_start: usize,
    total_cols: usize,
}

enum PhaseOutcome {
    Optimal,
    Unbounded,
    IterationLimit,
}

impl Tableau {
    /// Standardize the problem. Returns `None` when a constant row is
    /// already infeasible.
    fn build(problem: &Problem) -> Option<Self> {
        let nvars = problem.vars.len();

        // Fold fixed variables (lb == ub) out of the program.
        let mut col_of_var: Vec<Option<usize>> = vec![None; nvars];
        let mut var_of_col: Vec<usize> = Vec::new();
        for (j, var) in problem.vars.iter().enumerate() {
            if var.ub < var.lb - EPS {
                return None;
            }
            if var.ub - var.lb > EPS {
                col_of_var[j] = Some(var_of_col.len());
                var_of_col.push(j);
            }
        }
        let n = var_of_col.len();

        // Shift each free variable to start at zero: y_j = x_j - lb_j.
        // Rows become (coeffs, sense, rhs) over y.
        let mut rows: Vec<(Vec<f64>, Sense, f64)> = Vec::new();
        for constraint in &problem.constraints {
            let mut coeffs = vec![0.0; n];
            let mut rhs = constraint.rhs - constraint.expr.constant;
            for (var, coef) in &constraint.expr.terms {
                rhs -= coef * problem.vars[var.0].lb;
                if let Some(col) = col_of_var[var.0] {
                    coeffs[col] += coef;
                }
            }
            if coeffs.iter().all(|c| c.abs() <= EPS) {
                let ok = match constraint.sense {
                    Sense::Le => rhs >= -FEAS_EPS,
                    Sense::Ge => rhs <= FEAS_EPS,
                    Sense::Eq => rhs.abs() <= FEAS_EPS,
                };
                if !ok {
                    trace!(name = %constraint.name, "constant constraint infeasible");
                    return None;
                }
                continue;
            }
            rows.push((coeffs, constraint.sense, rhs));
        }

        // Finite upper bounds become explicit rows: y_j <= ub_j - lb_j.
        for (col, &j) in var_of_col.iter().enumerate() {
            let var = &problem.vars[j];
            if var.ub.is_finite() {
                let mut coeffs = vec![0.0; n];
                coeffs[col] = 1.0;
                rows.push((coeffs, Sense::Le, var.ub - var.lb));
            }
        }

        // Nonnegative rhs everywhere.
        for (coeffs, sense, rhs) in rows.iter_mut() {
            if *rhs < 0.0 {
                for c in coeffs.iter_mut() {
                    *c = -*c;
                }
                *rhs = -*rhs;
                *sense = match *sense {
                    Sense::Le => Sense::Ge,
                    Sense::Ge => Sense::Le,
                    Sense::Eq => Sense::Eq,
                };
            }
        }

        let m = rows.len();
        let num_slack = rows
            .iter()
            .filter(|(_, s, _)| matches!(s, Sense::Le | Sense::Ge))
            .count();
        let num_artificial = rows
            .iter()
            .filter(|(_, s, _)| matches!(s, Sense::Ge | Sense::Eq))
            .count();
        let artificial_start = n + num_slack;
        let total_cols = artificial_start + num_artificial;

        let mut t = DMatrix::zeros(m, total_cols + 1);
        let mut basis = vec![0usize; m];
        let mut next_slack = n;
        let mut next_artificial = artificial_start;

        for (i, (coeffs, sense, rhs)) in rows.iter().enumerate() {
            for (col, c) in coeffs.iter().enumerate() {
                t[(i, col)] = *c;
            }
            t[(i, total_cols)] = *rhs;
            match sense {
                Sense::Le => {
                    t[(i, next_slack)] = 1.0;
                    basis[i] = next_slack;
                    next_slack += 1;
                }
                Sense::Ge => {
                    t[(i, next_slack)] = -1.0;
                    next_slack += 1;
                    t[(i, next_artificial)] = 1.0;
                    basis[i] = next_artificial;
                    next_artificial += 1;
                }
                Sense::Eq => {
                    t[(i, next_artificial)] = 1.0;
                    basis[i] = next_artificial;
                    next_artificial += 1;
                }
            }
        }

        Some(Self {
            t,
            basis,
            col_of_var,
            var_of_col,
            num_structural: n,
            artificial_start,
            total_cols,
        })
    }

    fn solve(mut self, problem: &Problem) -> SolveResult {
        // Phase 1: drive artificials to zero.
        if self.artificial_start < self.total_cols {
            let mut phase1_costs = vec![0.0; self.total_cols];
            for c in phase1_costs[self.artificial_start..].iter_mut() {
                *c = 1.0;
            }
            let allowed = vec![true; self.total_cols];
            match self.run_phase(&phase1_costs, &allowed) {
                PhaseOutcome::Optimal => {}
                // Phase 1 is bounded below by zero; treat anything else as a limit.
                PhaseOutcome::Unbounded | PhaseOutcome::IterationLimit => {
                    return SolveResult::IterationLimit
                }
            }
            let phase1_value: f64 = self
                .basis
                .iter()
                .enumerate()
                .map(|(i, &b)| phase1_costs[b] * self.t[(i, self.total_cols)])
                .sum();
            if phase1_value > FEAS_EPS {
                return SolveResult::Infeasible;
            }
            self.expel_artificials();
        }

        // Phase 2: minimize the real objective over non-artificial columns.
        let mut costs = vec![0.0; self.total_cols];
        for (var, coef) in &problem.objective.terms {
            if let Some(col) = self.col_of_var[var.0] {
                costs[col] += coef;
            }
        }
        let mut allowed = vec![true; self.total_cols];
        for a in allowed[self.artificial_start..].iter_mut() {
            *a = false;
        }
        match self.run_phase(&costs, &allowed) {
            PhaseOutcome::Optimal => {}
            PhaseOutcome::Unbounded => return SolveResult::Unbounded,
            PhaseOutcome::IterationLimit => return SolveResult::IterationLimit,
        }

        // Recover x from the shifted solution.
        let mut values: Vec<f64> = problem.vars.iter().map(|v| v.lb).collect();
        for (i, &b) in self.basis.iter().enumerate() {
            if b < self.num_structural {
                let var = self.var_of_col[b];
                values[var] += self.t[(i, self.total_cols)];
            }
        }
        let objective = problem.objective.value(&values);
        SolveResult::Optimal { objective, values }
    }

    /// Bland-rule simplex iterations for one cost vector.
    fn run_phase(&mut self, costs: &[f64], allowed: &[bool]) -> PhaseOutcome {
        let m = self.t.nrows();
        let rhs_col = self.total_cols;

        for _ in 0..MAX_ITERATIONS {
            // Reduced costs; entering column is the smallest index with a
            // negative one.
            let mut entering = None;
            for j in 0..self.total_cols {
                if !allowed[j] || self.basis.contains(&j) {
                    continue;
                }
                let mut rc = costs[j];
                for i in 0..m {
                    rc -= costs[self.basis[i]] * self.t[(i, j)];
                }
                if rc < -EPS {
                    entering = Some(j);
                    break;
                }
            }
            let Some(j) = entering else {
                return PhaseOutcome::Optimal;
            };

            // Ratio test; ties broken by smallest basic variable index.
            let mut leaving: Option<(usize, f64)> = None;
            for i in 0..m {
                let a = self.t[(i, j)];
                if a > EPS {
                    let ratio = self.t[(i, rhs_col)] / a;
                    match leaving {
                        None => leaving = Some((i, ratio)),
                        Some((best_i, best_ratio)) => {
                            if ratio < best_ratio - EPS
                                || (ratio < best_ratio + EPS
                                    && self.basis[i] < self.basis[best_i])
                            {
                                leaving = Some((i, ratio));
                            }
                        }
                    }
                }
            }
            let Some((r, _)) = leaving else {
                return PhaseOutcome::Unbounded;
            };

            self.pivot(r, j);
        }
        PhaseOutcome::IterationLimit
    }

    fn pivot(&mut self, r: usize, j: usize) {
        let m = self.t.nrows();
        let cols = self.total_cols + 1;
        let pivot = self.t[(r, j)];
        for c in 0..cols {
            self.t[(r, c)] /= pivot;
        }
        for i in 0..m {
            if i == r {
                continue;
            }
            let factor = self.t[(i, j)];
            if factor.abs() > 0.0 {
                for c in 0..cols {
                    let delta = factor * self.t[(r, c)];
                    self.t[(i, c)] -= delta;
                }
            }
        }
        self.basis[r] = j;
    }

    /// After phase 1, pivot basic artificials out or drop their (redundant)
    /// rows so they can never re-enter.
    fn expel_artificials(&mut self) {
        let mut i = 0;
        while i < self.t.nrows() {
            if self.basis[i] >= self.artificial_start {
                let replacement = (0..self.artificial_start)
                    .find(|&j| !self.basis.contains(&j) && self.t[(i, j)].abs() > EPS);
                match replacement {
                    Some(j) => {
                        self.pivot(i, j);
                        i += 1;
                    }
                    None => {
                        // Row is zero over real columns: redundant.
                        self.t = self.t.clone().remove_row(i);
                        self.basis.remove(i);
                    }
                }
            } else {
                i += 1;
            }
        }
    }
}
