//! Core domain model for the tax-aware rebalancing engine.
//!
//! Tax lots, prices, targets, restrictions, wash-sale derivation, drift and
//! factor reports, and the per-strategy portfolio model.

pub mod drift;
pub mod error;
pub mod strategy;
pub mod types;
pub mod wash_sale;

pub use drift::{DriftComparison, DriftReport, DriftRow, FactorComparison, FactorReport};
pub use error::EngineError;
pub use strategy::{Strategy, StrategyKind, Weights};
pub use types::{
    ClosedLot, FactorModel, GainLossRow, GainType, Prices, RestrictionDirection, Spreads,
    StockRestriction, Target, TaxLot, TaxRates, Trade, TradeSide, CASH_ID,
    LONG_TERM_THRESHOLD_DAYS,
};
pub use wash_sale::{
    WashSaleBuyRestriction, WashSaleReason, WashSaleRestrictions, WashSaleSellRestriction,
};
