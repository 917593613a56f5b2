//! Ledger adapter abstraction.
//!
//! Anchoring is an irreversible, append-only write to an external consensus
//! system. This module defines the `LedgerAdapter` trait the pipeline talks
//! to, independent of whether the ledger is a remote gateway or the local
//! journal used in development.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::{digests_match, normalize_digest};

/// Error types for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Nothing has been anchored for this complaint
    #[error("Complaint {0} is not anchored")]
    NotAnchored(i64),

    /// Temporary condition (nonce conflict, RPC timeout); safe to retry
    #[error("Transient ledger failure: {0}")]
    Transient(String),

    /// The ledger rejected the call
    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The ledger answered with something we could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Digest is not 32 bytes of hex
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Local journal storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_) | LedgerError::Network(_))
    }

    /// Whether a later re-anchor of the same digest may succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LedgerError::InvalidDigest(_) | LedgerError::NotAnchored(_))
    }
}

/// One `ManifestAnchored` event as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorEvent {
    pub complaint_id: i64,
    /// Normalized lowercase hex digest
    pub digest: String,
    /// Transaction reference returned by `anchor`
    pub tx_ref: String,
    pub anchored_at: DateTime<Utc>,
}

/// Result of comparing a freshly derived digest against the anchored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestComparison {
    pub complaint_id: i64,
    pub current_digest: String,
    pub anchored_digest: String,
    pub matches: bool,
}

/// Trait for anchoring and reading back complaint manifest digests.
///
/// Implementations must be safe to share across triage jobs.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Adapter identifier for logs (e.g. gateway URL or journal path).
    fn id(&self) -> &str;

    /// Anchor a digest for a complaint, returning the transaction reference.
    async fn anchor(&self, complaint_id: i64, digest: &str) -> Result<String, LedgerError>;

    /// Read back the latest anchored digest for a complaint.
    async fn verify(&self, complaint_id: i64) -> Result<String, LedgerError>;

    /// Every complaint id with at least one anchor event, scanned from genesis.
    async fn enumerate_anchored_ids(&self) -> Result<BTreeSet<i64>, LedgerError>;

    /// Compare `current_digest` with the anchored value (case and prefix insensitive).
    async fn compare(
        &self,
        complaint_id: i64,
        current_digest: &str,
    ) -> Result<DigestComparison, LedgerError> {
        let anchored = self.verify(complaint_id).await?;
        let matches = digests_match(&anchored, current_digest);
        if !matches {
            tracing::warn!(
                complaint_id,
                anchored = %normalize_digest(&anchored),
                current = %normalize_digest(current_digest),
                "Manifest digest mismatch"
            );
        }
        Ok(DigestComparison {
            complaint_id,
            current_digest: normalize_digest(current_digest),
            anchored_digest: normalize_digest(&anchored),
            matches,
        })
    }
}

/// Validate and normalize a digest before it is written to a ledger.
pub fn checked_digest(digest: &str) -> Result<String, LedgerError> {
    let normalized = normalize_digest(digest);
    if normalized.len() != 64 || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(LedgerError::InvalidDigest(digest.to_string()));
    }
    Ok(normalized)
}

/// The all-zero digest a contract mapping returns for unknown keys.
pub(crate) fn is_zero_digest(digest: &str) -> bool {
    let normalized = normalize_digest(digest);
    !normalized.is_empty() && normalized.bytes().all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_digest_accepts_prefixed_uppercase() {
        let digest = format!("0x{}", "AB".repeat(32));
        assert_eq!(checked_digest(&digest).unwrap(), "ab".repeat(32));
    }

    #[test]
    fn test_checked_digest_rejects_short_or_non_hex() {
        assert!(checked_digest("abcd").is_err());
        assert!(checked_digest(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_zero_digest_detection() {
        assert!(is_zero_digest(&format!("0x{}", "0".repeat(64))));
        assert!(!is_zero_digest(&"0a".repeat(32)));
        assert!(!is_zero_digest(""));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Transient("nonce too low".into()).is_transient());
        assert!(LedgerError::Network("reset".into()).is_transient());
        assert!(!LedgerError::NotAnchored(1).is_transient());
        assert!(LedgerError::Rpc { code: 3, message: "reverted".into() }.is_recoverable());
        assert!(!LedgerError::InvalidDigest("xyz".into()).is_recoverable());
    }
}
