//! Piecewise-linear deviation encoding.
//!
//! |deviation| is replaced by a convex piecewise-linear penalty that is
//! gentle near the target and steep far away. Breakpoints scale with the
//! mean target weight so the same shape works for concentrated and broad
//! allocations.

use milp_solver::{LinExpr, Problem, Sense};

/// Segment breakpoints as multiples of the reference scale.
const BREAKPOINT_FACTORS: [f64; 4] = [0.25, 0.5, 1.0, 2.0];
/// Slope per segment; the last covers everything past the final breakpoint.
const SEGMENT_SLOPES: [f64; 5] = [0.5, 1.0, 2.0, 4.0, 8.0];

/// Widths of the bounded segments for a reference scale.
fn segment_widths(scale: f64) -> [f64; 4] {
    let b = BREAKPOINT_FACTORS;
    [
        b[0] * scale,
        (b[1] - b[0]) * scale,
        (b[2] - b[1]) * scale,
        (b[3] - b[2]) * scale,
    ]
}

/// Encode the piecewise penalty of `deviation` into `problem` and return
/// the cost expression (already scaled by `normalization`).
///
/// Both signs are segmented symmetrically; minimization fills the cheap
/// inner segments first because the slopes increase outward.
pub fn piecewise_deviation_cost(
    problem: &mut Problem,
    name: &str,
    deviation: &LinExpr,
    scale: f64,
    normalization: f64,
) -> LinExpr {
    let scale = if scale > 0.0 { scale } else { 1.0 };
    let widths = segment_widths(scale);

    let mut cost = LinExpr::new();
    let mut balance = deviation.clone();

    for (side, sign) in [("pos", -1.0), ("neg", 1.0)] {
        for (k, slope) in SEGMENT_SLOPES.iter().enumerate() {
            let ub = if k < widths.len() {
                widths[k]
            } else {
                f64::INFINITY
            };
            let var = problem.add_var(format!("{}_{}_{}", name, side, k), 0.0, ub);
            // deviation - sum(pos) + sum(neg) == 0
            balance.add_term(var, sign);
            cost.add_term(var, slope * normalization);
        }
    }

    problem.add_constraint(format!("{}_balance", name), balance, Sense::Eq, 0.0);
    cost
}

/// Closed-form value of the piecewise penalty at a known deviation. Used to
/// evaluate the baseline objective without a solve.
pub fn piecewise_deviation_value(deviation: f64, scale: f64, normalization: f64) -> f64 {
    let scale = if scale > 0.0 { scale } else { 1.0 };
    let widths = segment_widths(scale);
    let mut remaining = deviation.abs();
    let mut value = 0.0;
    for (k, slope) in SEGMENT_SLOPES.iter().enumerate() {
        let width = if k < widths.len() {
            widths[k]
        } else {
            f64::INFINITY
        };
        let here = remaining.min(width);
        value += slope * here;
        remaining -= here;
        if remaining <= 0.0 {
            break;
        }
    }
    value * normalization
}
