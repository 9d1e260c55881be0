use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Checkpoint corruption: artifact {0} failed checksum verification")]
    CheckpointCorruption(String),

    #[error("Tax inconsistency: {0}")]
    Inconsistency(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
