//! Linear program model: variables, expressions, constraints.

/// Dense variable index. Assigned at build time; variables never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub lb: f64,
    /// `f64::INFINITY` for an unbounded variable.
    pub ub: f64,
    pub binary: bool,
}

/// Sparse linear expression: coefficient terms plus a constant.
#[derive(Debug, Clone, Default)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(var: VarId, coef: f64) -> Self {
        Self {
            terms: vec![(var, coef)],
            constant: 0.0,
        }
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) -> &mut Self {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
        self
    }

    pub fn add_constant(&mut self, value: f64) -> &mut Self {
        self.constant += value;
        self
    }

    pub fn add_expr(&mut self, other: &LinExpr) -> &mut Self {
        self.terms.extend(other.terms.iter().copied());
        self.constant += other.constant;
        self
    }

    /// Evaluate at a full assignment.
    pub fn value(&self, values: &[f64]) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|(var, coef)| coef * values[var.0])
                .sum::<f64>()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub expr: LinExpr,
    pub sense: Sense,
    pub rhs: f64,
}

/// Outcome of a solve.
#[derive(Debug, Clone)]
pub enum SolveResult {
    Optimal { objective: f64, values: Vec<f64> },
    Infeasible,
    Unbounded,
    /// Pivot or node limit hit without a proven optimum.
    IterationLimit,
}

impl SolveResult {
    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveResult::Optimal { .. })
    }
}

/// A minimization program. Constraint emission order is preserved and part
/// of the solve contract.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub(crate) vars: Vec<Variable>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) objective: LinExpr,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, name: impl Into<String>, lb: f64, ub: f64) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            name: name.into(),
            lb,
            ub,
            binary: false,
        });
        id
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            name: name.into(),
            lb: 0.0,
            ub: 1.0,
            binary: true,
        });
        id
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: LinExpr,
        sense: Sense,
        rhs: f64,
    ) {
        self.constraints.push(Constraint {
            name: name.into(),
            expr,
            sense,
            rhs,
        });
    }

    /// Minimize `objective`.
    pub fn set_objective(&mut self, objective: LinExpr) {
        self.objective = objective;
    }

    /// Pin a variable to a single value.
    pub fn fix(&mut self, var: VarId, value: f64) {
        self.vars[var.0].lb = value;
        self.vars[var.0].ub = value;
    }

    pub fn set_bounds(&mut self, var: VarId, lb: f64, ub: f64) {
        self.vars[var.0].lb = lb;
        self.vars[var.0].ub = ub;
    }

    pub fn upper_bound(&self, var: VarId) -> f64 {
        self.vars[var.0].ub
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn var_name(&self, var: VarId) -> &str {
        &self.vars[var.0].name
    }

    pub fn binary_vars(&self) -> Vec<VarId> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.binary)
            .map(|(i, _)| VarId(i))
            .collect()
    }

    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expr_evaluation() {
        let mut expr = LinExpr::new();
        expr.add_term(VarId(0), 2.0).add_term(VarId(1), -1.0).add_constant(3.0);
        assert_eq!(expr.value(&[1.0, 4.0]), 2.0 - 4.0 + 3.0);
    }

    #[test]
    fn zero_coefficients_dropped() {
        let mut expr = LinExpr::new();
        expr.add_term(VarId(0), 0.0);
        assert!(expr.is_empty());
    }

    #[test]
    fn fix_collapses_bounds() {
        let mut p = Problem::new();
        let x = p.add_var("x", 0.0, 10.0);
        p.fix(x, 3.0);
        assert_eq!(p.vars[0].lb, 3.0);
        assert_eq!(p.vars[0].ub, 3.0);
    }
}
