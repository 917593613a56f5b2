//! Ledger vs database reconciliation and per-complaint integrity checks
//!
//! Both operations are read-only. A ledger read failure is returned as
//! `TriageError::LedgerRead`; it never turns into a passing result.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use civic_ledger::LedgerAdapter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{complaints, Database};
use crate::error::TriageError;
use crate::orchestrator::complaint_manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Pass,
    Fail,
}

/// Ledger-vs-database reconciliation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub total_anchored_on_blockchain: usize,
    pub total_records_in_db: usize,
    pub missing_records_count: usize,
    /// Anchored on the ledger but absent from the database
    pub illegally_deleted_ids: Vec<i64>,
    /// Soft-deleted, which is allowed
    pub archived_ids: Vec<i64>,
    pub audit_status: AuditStatus,
    pub generated_at: DateTime<Utc>,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.audit_status == AuditStatus::Pass
    }
}

/// Integrity of one complaint against its anchored digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub complaint_id: i64,
    pub is_tampered: bool,
    pub current_digest: String,
    pub anchored_digest: String,
}

/// `anchored - db_ids`, ascending, plus the pass/fail verdict.
pub fn reconcile(anchored: &BTreeSet<i64>, db_ids: &BTreeSet<i64>, archived_ids: Vec<i64>) -> AuditReport {
    let illegally_deleted_ids: Vec<i64> = anchored.difference(db_ids).copied().collect();
    let audit_status = if illegally_deleted_ids.is_empty() {
        AuditStatus::Pass
    } else {
        AuditStatus::Fail
    };

    AuditReport {
        total_anchored_on_blockchain: anchored.len(),
        total_records_in_db: db_ids.len(),
        missing_records_count: illegally_deleted_ids.len(),
        illegally_deleted_ids,
        archived_ids,
        audit_status,
        generated_at: Utc::now(),
    }
}

/// Reads both stores to detect illegal deletion and tampering
pub struct AuditReconciler {
    db: Arc<Database>,
    ledger: Arc<dyn LedgerAdapter>,
}

impl AuditReconciler {
    pub fn new(db: Arc<Database>, ledger: Arc<dyn LedgerAdapter>) -> Self {
        Self { db, ledger }
    }

    /// Full ledger scan against every database row, soft-deleted included.
    pub async fn report(&self) -> Result<AuditReport, TriageError> {
        let anchored = self
            .ledger
            .enumerate_anchored_ids()
            .await
            .map_err(TriageError::LedgerRead)?;

        let (db_ids, archived) = self
            .db
            .with_conn(|conn| Ok((complaints::list_all_ids(conn)?, complaints::list_archived_ids(conn)?)))?;

        let report = reconcile(&anchored, &db_ids, archived);
        if report.passed() {
            info!(
                anchored = report.total_anchored_on_blockchain,
                records = report.total_records_in_db,
                "Audit passed"
            );
        } else {
            warn!(
                missing = report.missing_records_count,
                ids = ?report.illegally_deleted_ids,
                "Audit failed: anchored complaints missing from database"
            );
        }
        Ok(report)
    }

    /// Re-derive the digest from current rows and compare with the ledger.
    pub async fn verify_integrity(&self, complaint_id: i64) -> Result<IntegrityReport, TriageError> {
        let current_digest = self.db.with_conn(|conn| {
            let complaint = complaints::require_complaint(conn, complaint_id)?;
            Ok(complaint_manifest(conn, &complaint, complaint.severity_score)?.digest())
        })?;

        let comparison = self
            .ledger
            .compare(complaint_id, &current_digest)
            .await
            .map_err(TriageError::LedgerRead)?;

        Ok(IntegrityReport {
            complaint_id,
            is_tampered: !comparison.matches,
            current_digest: comparison.current_digest,
            anchored_digest: comparison.anchored_digest,
        })
    }
}
