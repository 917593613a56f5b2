//! Error types for civic-triage

use civic_ledger::LedgerError;
use civic_oracle::OracleError;
use thiserror::Error;

use crate::models::AnalysisStatus;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Complaint not found: {0}")]
    NotFound(i64),

    #[error("Evidence already exists with hash {0}")]
    DuplicateEvidence(String),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Anchoring failed; the triage result is kept
    #[error("Ledger write failed: {0}")]
    LedgerWrite(LedgerError),

    /// Reading the ledger failed; never treated as "no tampering"
    #[error("Ledger read failed: {0}")]
    LedgerRead(LedgerError),

    #[error("Complaint {id} is {status}, not processing")]
    NotProcessing { id: i64, status: AnalysisStatus },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl TriageError {
    /// Whether re-running the job may succeed. A missing complaint never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            TriageError::NotFound(_)
            | TriageError::DuplicateEvidence(_)
            | TriageError::NotProcessing { .. }
            | TriageError::Forbidden(_)
            | TriageError::InvalidUpdate(_)
            | TriageError::Config(_) => false,
            TriageError::Oracle(_)
            | TriageError::LedgerWrite(_)
            | TriageError::LedgerRead(_)
            | TriageError::Queue(_)
            | TriageError::Io(_)
            | TriageError::Json(_)
            | TriageError::Database(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
