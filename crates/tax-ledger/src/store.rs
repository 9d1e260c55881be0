//! Append-only artifact store.
//!
//! Artifacts live at `<cache>/tax_artifacts/<artifact_id>.json`; the
//! filename is the primary key. Writes go to a fresh temp file and are
//! renamed into place, then the in-memory index is swapped, so readers
//! never observe a partial artifact. Checksums are verified on every read.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::artifact::TaxArtifact;
use crate::error::LedgerError;

pub struct ArtifactStore {
    directory: PathBuf,
    /// artifact_id -> path.
    index: HashMap<String, PathBuf>,
    /// allocation_id -> latest artifact_id.
    by_allocation: HashMap<String, String>,
}

impl ArtifactStore {
    /// Open (and create if needed) the store under `cache_dir`.
    pub fn open(cache_dir: &Path) -> Result<Self, LedgerError> {
        let directory = cache_dir.join("tax_artifacts");
        fs::create_dir_all(&directory)?;

        let mut store = Self {
            directory,
            index: HashMap::new(),
            by_allocation: HashMap::new(),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    /// Scan the directory into the in-memory index. Corrupt files are
    /// logged and skipped; they stay on disk for forensics.
    fn rebuild_index(&mut self) -> Result<(), LedgerError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            match Self::read_artifact(&path) {
                Ok(artifact) => {
                    self.by_allocation
                        .insert(artifact.allocation_id.clone(), artifact.artifact_id.clone());
                    self.index.insert(artifact.artifact_id, path);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable artifact");
                }
            }
        }
        Ok(())
    }

    fn read_artifact(path: &Path) -> Result<TaxArtifact, LedgerError> {
        let contents = fs::read_to_string(path)?;
        let artifact: TaxArtifact = serde_json::from_str(&contents)?;
        artifact.verify_checksum()?;
        Ok(artifact)
    }

    /// Persist an artifact. Append-only: overwriting an existing id is
    /// refused.
    pub fn persist(&mut self, artifact: &TaxArtifact) -> Result<PathBuf, LedgerError> {
        if self.index.contains_key(&artifact.artifact_id) {
            return Err(LedgerError::InvalidInput(format!(
                "artifact {} already stored",
                artifact.artifact_id
            )));
        }
        artifact.verify_checksum()?;

        let path = self.directory.join(format!("{}.json", artifact.artifact_id));
        let tmp_path = self.directory.join(format!(".{}.tmp", artifact.artifact_id));
        fs::write(&tmp_path, serde_json::to_string_pretty(artifact)?)?;
        fs::rename(&tmp_path, &path)?;

        // Index swap happens only after the file is durable.
        self.index
            .insert(artifact.artifact_id.clone(), path.clone());
        self.by_allocation
            .insert(artifact.allocation_id.clone(), artifact.artifact_id.clone());

        info!(artifact_id = %artifact.artifact_id, path = %path.display(), "artifact persisted");
        Ok(path)
    }

    /// Load by artifact id, re-verifying the checksum.
    pub fn get(&self, artifact_id: &str) -> Result<TaxArtifact, LedgerError> {
        let path = self
            .index
            .get(artifact_id)
            .ok_or_else(|| LedgerError::NotFound(artifact_id.to_string()))?;
        Self::read_artifact(path)
    }

    /// Latest artifact for an allocation.
    pub fn get_by_allocation(&self, allocation_id: &str) -> Result<TaxArtifact, LedgerError> {
        let artifact_id = self
            .by_allocation
            .get(allocation_id)
            .ok_or_else(|| LedgerError::NotFound(allocation_id.to_string()))?;
        self.get(artifact_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{PositionEntry, RealizedGains, TaxLiability};
    use chrono::{TimeZone, Utc};
    use std::fs;

    fn temp_store_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tax-ledger-test-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn artifact(id: &str, allocation: &str) -> TaxArtifact {
        TaxArtifact {
            artifact_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 16, 12, 0, 0).unwrap(),
            allocation_id: allocation.to_string(),
            tax_year: 2025,
            positions: vec![PositionEntry {
                identifier: "VOO".to_string(),
                weight: 1.0,
                cost_basis: 1000.0,
            }],
            realized_gains: RealizedGains::default(),
            unrealized_gains: 0.0,
            tax_liability: TaxLiability::default(),
            wash_sales: Vec::new(),
            checksum: String::new(),
        }
        .seal()
        .unwrap()
    }

    #[test]
    fn persist_and_retrieve() {
        let dir = temp_store_dir("basic");
        let mut store = ArtifactStore::open(&dir).unwrap();
        let artifact = artifact("a1", "alloc1");
        store.persist(&artifact).unwrap();

        let loaded = store.get("a1").unwrap();
        assert_eq!(loaded.checksum, artifact.checksum);
        let by_allocation = store.get_by_allocation("alloc1").unwrap();
        assert_eq!(by_allocation.artifact_id, "a1");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn append_only_refuses_overwrite() {
        let dir = temp_store_dir("appendonly");
        let mut store = ArtifactStore::open(&dir).unwrap();
        let artifact = artifact("a1", "alloc1");
        store.persist(&artifact).unwrap();
        assert!(store.persist(&artifact).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn corrupted_file_detected_on_read() {
        let dir = temp_store_dir("corrupt");
        let mut store = ArtifactStore::open(&dir).unwrap();
        let artifact = artifact("a1", "alloc1");
        let path = store.persist(&artifact).unwrap();

        // Flip a stored number without resealing.
        let contents = fs::read_to_string(&path)
            .unwrap()
            .replace("\"unrealized_gains\": 0.0", "\"unrealized_gains\": 9.0");
        fs::write(&path, contents).unwrap();

        assert!(matches!(
            store.get("a1"),
            Err(LedgerError::CheckpointCorruption(_))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn index_rebuilt_on_reopen() {
        let dir = temp_store_dir("reopen");
        {
            let mut store = ArtifactStore::open(&dir).unwrap();
            store.persist(&artifact("a1", "alloc1")).unwrap();
            store.persist(&artifact("a2", "alloc2")).unwrap();
        }
        let store = ArtifactStore::open(&dir).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("a2").is_ok());

        fs::remove_dir_all(&dir).unwrap();
    }
}
