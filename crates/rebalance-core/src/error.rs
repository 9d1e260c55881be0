use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Price missing for identifier: {0}")]
    MissingPrice(String),

    #[error("Unknown strategy kind: {0}")]
    UnknownStrategyKind(String),

    #[error("Target weights sum to {0}, expected 1")]
    TargetWeightSum(f64),

    #[error("Nonfinite rate for {0}")]
    NonfiniteRate(String),

    #[error("Optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("Tax inconsistency: {0}")]
    TaxInconsistency(String),
}
