//! Small dense linear / mixed-integer program solver.
//!
//! Variables are dense-indexed (`VarId`), constraints keep their emission
//! order, and solves are fully deterministic: the simplex pivots by Bland's
//! rule and branch & bound explores binaries in index order, zero branch
//! first. Built for the rebalancing programs this workspace emits, which are
//! small (tens of variables) but must solve identically on every run.

pub mod branch_bound;
pub mod problem;
pub mod simplex;

pub use branch_bound::solve_milp;
pub use problem::{Constraint, LinExpr, Problem, Sense, SolveResult, VarId};
pub use simplex::solve_lp;
