//! Tax-aware rebalancing engine.
//!
//! Builds a mixed-integer program per strategy (decision variables,
//! constraints, weighted objective), runs the baseline / rebalance /
//! buy-only solve sequence, synthesizes lot-level trades, and nets them
//! across strategies.

pub mod account;
pub mod constraints;
pub mod netting;
pub mod objectives;
pub mod piecewise;
pub mod settings;
pub mod solver;
pub mod summary;
pub mod trades;
pub mod variables;
pub mod withdrawal;

pub use account::{Account, AccountRunResult};
pub use settings::OptimizationSettings;
pub use solver::{
    optimize_strategy, ExplanationContext, NoTradeCase, OptimizationStatus, StrategyContext,
    StrategyResult,
};
pub use summary::TradeSummary;
pub use withdrawal::MaxWithdrawalResult;
