//! Deterministic tax reconciliation ledger.
//!
//! On each revision of an allocation the ledger recomputes realized gains
//! (FIFO or lot-level), audits wash sales over a rolling 61-day window,
//! prices the tax liability, and freezes the result into an immutable,
//! checksummed artifact stored append-only on disk. The artifact is the
//! single source of truth for downstream consumers.

pub mod artifact;
pub mod error;
pub mod ledger;
pub mod store;

pub use artifact::{
    PositionEntry, RealizedGains, TaxArtifact, TaxLiability, WashSaleAdjustment,
};
pub use error::LedgerError;
pub use ledger::{LotSlice, PurchaseRecord, RequiredTrade, TaxBrackets, TaxLedger};
pub use store::ArtifactStore;
