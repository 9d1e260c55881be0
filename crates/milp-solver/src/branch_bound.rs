//! Depth-first branch & bound over binary variables.
//!
//! Branch order is fixed: the first fractional binary by variable index,
//! zero branch explored before the one branch. Combined with the
//! deterministic simplex this makes MILP solves reproducible.

use tracing::trace;

use crate::problem::{Problem, SolveResult};
use crate::simplex::solve_lp;

const INT_TOL: f64 = 1e-6;
const BOUND_TOL: f64 = 1e-9;
const MAX_NODES: usize = 10_000;

/// Solve a mixed-integer program. Falls through to a plain LP solve when
/// the problem has no binary variables.
pub fn solve_milp(problem: &Problem) -> SolveResult {
    let binaries = problem.binary_vars();
    if binaries.is_empty() {
        return solve_lp(problem);
    }

    let mut search = Search {
        incumbent: None,
        nodes: 0,
        hit_limit: false,
    };
    let root_status = search.explore(problem.clone(), &binaries);

    match (search.incumbent, root_status) {
        (Some((objective, values)), _) => SolveResult::Optimal { objective, values },
        (None, RootStatus::Unbounded) => SolveResult::Unbounded,
        (None, _) if search.hit_limit => SolveResult::IterationLimit,
        (None, _) => SolveResult::Infeasible,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RootStatus {
    Done,
    Unbounded,
}

struct Search {
    incumbent: Option<(f64, Vec<f64>)>,
    nodes: usize,
    hit_limit: bool,
}

impl Search {
    fn explore(&mut self, problem: Problem, binaries: &[crate::problem::VarId]) -> RootStatus {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            self.hit_limit = true;
            return RootStatus::Done;
        }

        let relaxation = solve_lp(&problem);
        let (objective, values) = match relaxation {
            SolveResult::Optimal { objective, values } => (objective, values),
            SolveResult::Infeasible => return RootStatus::Done,
            SolveResult::Unbounded => return RootStatus::Unbounded,
            SolveResult::IterationLimit => {
                self.hit_limit = true;
                return RootStatus::Done;
            }
        };

        // Bound: the relaxation can only get worse further down.
        if let Some((best, _)) = &self.incumbent {
            if objective >= best - BOUND_TOL {
                return RootStatus::Done;
            }
        }

        let fractional = binaries
            .iter()
            .find(|var| {
                let v = values[var.0];
                (v - v.round()).abs() > INT_TOL
            })
            .copied();

        match fractional {
            None => {
                trace!(objective, nodes = self.nodes, "integral incumbent");
                let improved = self
                    .incumbent
                    .as_ref()
                    .map(|(best, _)| objective < best - BOUND_TOL)
                    .unwrap_or(true);
                if improved {
                    self.incumbent = Some((objective, values));
                }
                RootStatus::Done
            }
            Some(var) => {
                let mut zero_branch = problem.clone();
                zero_branch.fix(var, 0.0);
                let status = self.explore(zero_branch, binaries);
                if status == RootStatus::Unbounded {
                    return status;
                }

                let mut one_branch = problem;
                one_branch.fix(var, 1.0);
                self.explore(one_branch, binaries)
            }
        }
    }
}
