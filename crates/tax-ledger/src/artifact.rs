//! Immutable tax artifact with a canonical-serialization checksum.
//!
//! Canonical form: JSON with lexicographically sorted keys, dollar amounts
//! rounded to 2 decimals, weights to 10 significant digits, ISO-8601
//! timestamps. The checksum is SHA-256 over the canonical UTF-8 bytes,
//! truncated to 16 hex characters, and excludes the checksum field itself.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LedgerError;

/// Round a dollar amount to 2 decimal places.
pub fn round_dollars(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2).to_f64().unwrap_or(0.0))
        .unwrap_or(0.0)
}

/// Round to 10 significant digits.
pub fn round_weight(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return 0.0;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = 9 - magnitude;
    if decimals <= 0 {
        return value;
    }
    let factor = 10f64.powi(decimals.min(15));
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionEntry {
    pub identifier: String,
    pub weight: f64,
    pub cost_basis: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RealizedGains {
    pub short_term: f64,
    pub long_term: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaxLiability {
    pub st_tax: f64,
    pub lt_tax: f64,
    pub niit: f64,
    pub total: f64,
}

/// A loss disallowed by the ledger's wash-sale audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WashSaleAdjustment {
    pub identifier: String,
    pub sale_date: NaiveDate,
    pub disallowed_loss: f64,
}

/// Immutable record of one tax reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxArtifact {
    pub artifact_id: String,
    pub timestamp: DateTime<Utc>,
    pub allocation_id: String,
    pub tax_year: i32,
    pub positions: Vec<PositionEntry>,
    pub realized_gains: RealizedGains,
    pub unrealized_gains: f64,
    pub tax_liability: TaxLiability,
    pub wash_sales: Vec<WashSaleAdjustment>,
    pub checksum: String,
}

impl TaxArtifact {
    /// Canonical JSON of every field except the checksum. serde_json maps
    /// are BTree-backed, so converting through `Value` sorts all keys.
    pub fn canonical_payload(&self) -> Result<String, LedgerError> {
        let mut without_checksum = self.clone();
        without_checksum.checksum = String::new();
        let mut value = serde_json::to_value(&without_checksum)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("checksum");
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// SHA-256 of the canonical payload, truncated to 16 hex characters.
    pub fn compute_checksum(&self) -> Result<String, LedgerError> {
        let payload = self.canonical_payload()?;
        let digest = Sha256::digest(payload.as_bytes());
        Ok(hex::encode(digest)[..16].to_string())
    }

    /// Fill in the checksum field from current contents.
    pub fn seal(mut self) -> Result<Self, LedgerError> {
        self.checksum = self.compute_checksum()?;
        Ok(self)
    }

    /// Recompute and compare the stored checksum.
    pub fn verify_checksum(&self) -> Result<(), LedgerError> {
        let expected = self.compute_checksum()?;
        if expected != self.checksum {
            return Err(LedgerError::CheckpointCorruption(self.artifact_id.clone()));
        }
        Ok(())
    }

    /// Check the artifact against a live allocation: identical identifier
    /// sets, per-identifier weights within 1e-3, and a valid checksum.
    /// Returns `(ok, reason)`.
    pub fn verify_consistency(&self, allocation: &BTreeMap<String, f64>) -> (bool, Option<String>) {
        let artifact_ids: Vec<&str> =
            self.positions.iter().map(|p| p.identifier.as_str()).collect();
        let allocation_ids: Vec<&str> = allocation.keys().map(|k| k.as_str()).collect();
        if artifact_ids.len() != allocation_ids.len()
            || artifact_ids.iter().any(|id| !allocation.contains_key(*id))
        {
            return (
                false,
                Some(format!(
                    "identifier sets differ: artifact has [{}], allocation has [{}]",
                    artifact_ids.join(", "),
                    allocation_ids.join(", ")
                )),
            );
        }
        for position in &self.positions {
            let weight = allocation[&position.identifier];
            if (weight - position.weight).abs() > 1e-3 {
                return (
                    false,
                    Some(format!(
                        "weight mismatch for {}: artifact {} vs allocation {}",
                        position.identifier, position.weight, weight
                    )),
                );
            }
        }
        if let Err(err) = self.verify_checksum() {
            return (false, Some(err.to_string()));
        }
        (true, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_artifact() -> TaxArtifact {
        TaxArtifact {
            artifact_id: "tax_alloc1_20250616".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 16, 12, 0, 0).unwrap(),
            allocation_id: "alloc1".to_string(),
            tax_year: 2025,
            positions: vec![
                PositionEntry {
                    identifier: "BND".to_string(),
                    weight: 0.4,
                    cost_basis: 20000.0,
                },
                PositionEntry {
                    identifier: "VOO".to_string(),
                    weight: 0.6,
                    cost_basis: 40000.0,
                },
            ],
            realized_gains: RealizedGains {
                short_term: 100.0,
                long_term: 250.0,
                total: 350.0,
            },
            unrealized_gains: 10000.0,
            tax_liability: TaxLiability {
                st_tax: 37.0,
                lt_tax: 37.5,
                niit: 13.3,
                total: 87.8,
            },
            wash_sales: Vec::new(),
            checksum: String::new(),
        }
    }

    #[test]
    fn rounding_rules() {
        assert_eq!(round_dollars(10.456), 10.46);
        assert_eq!(round_dollars(-3.006), -3.01);
        assert_eq!(round_weight(0.123456789012345), 0.1234567890);
        assert_eq!(round_weight(0.0), 0.0);
    }

    #[test]
    fn checksum_is_16_hex_chars() {
        let artifact = sample_artifact().seal().unwrap();
        assert_eq!(artifact.checksum.len(), 16);
        assert!(artifact.checksum.chars().all(|c| c.is_ascii_hexdigit()));
        artifact.verify_checksum().unwrap();
    }

    #[test]
    fn checksum_round_trip_is_stable() {
        let artifact = sample_artifact().seal().unwrap();
        let json = serde_json::to_string(&artifact).unwrap();
        let restored: TaxArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.compute_checksum().unwrap(), artifact.checksum);
    }

    #[test]
    fn tampering_breaks_checksum() {
        let mut artifact = sample_artifact().seal().unwrap();
        artifact.realized_gains.total = 999.0;
        assert!(matches!(
            artifact.verify_checksum(),
            Err(LedgerError::CheckpointCorruption(_))
        ));
    }

    #[test]
    fn canonical_payload_sorts_keys() {
        let artifact = sample_artifact();
        let payload = artifact.canonical_payload().unwrap();
        let allocation_idx = payload.find("allocation_id").unwrap();
        let wash_idx = payload.find("wash_sales").unwrap();
        assert!(allocation_idx < wash_idx);
        assert!(!payload.contains("checksum"));
    }

    #[test]
    fn consistency_checks_weights_and_sets() {
        let artifact = sample_artifact().seal().unwrap();

        let mut good = BTreeMap::new();
        good.insert("VOO".to_string(), 0.6004);
        good.insert("BND".to_string(), 0.3996);
        let (ok, reason) = artifact.verify_consistency(&good);
        assert!(ok, "unexpected failure: {:?}", reason);

        let mut drifted = BTreeMap::new();
        drifted.insert("VOO".to_string(), 0.7);
        drifted.insert("BND".to_string(), 0.3);
        let (ok, reason) = artifact.verify_consistency(&drifted);
        assert!(!ok);
        assert!(reason.unwrap().contains("weight mismatch"));

        let mut different = BTreeMap::new();
        different.insert("VOO".to_string(), 0.6);
        different.insert("GLD".to_string(), 0.4);
        let (ok, reason) = artifact.verify_consistency(&different);
        assert!(!ok);
        assert!(reason.unwrap().contains("identifier sets differ"));
    }
}
