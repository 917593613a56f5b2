//! Entry points for the layers above the pipeline
//!
//! Filing, evidence intake, analysis triggers, audit queries and the
//! official update path, all over one shared store, orchestrator and queue.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::access::{authorize_update, ComplaintUpdate, Subject};
use crate::audit::{AuditReconciler, AuditReport, IntegrityReport};
use crate::db::{complaints, departments, evidence, Database, DbStats};
use crate::error::Result;
use crate::models::{AnalysisStatus, Complaint, NewComplaint, NewEvidence};
use crate::orchestrator::{complaint_manifest, TriageOrchestrator, TriageOutcome};
use crate::queue::{QueueConfig, TriageQueue};

/// Outcome of a re-anchoring sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReanchorSummary {
    pub attempted: usize,
    pub anchored: Vec<i64>,
    pub still_pending: Vec<i64>,
}

/// Facade over the triage pipeline
pub struct TriageService {
    db: Arc<Database>,
    orchestrator: Arc<TriageOrchestrator>,
    queue: Arc<TriageQueue>,
    auditor: AuditReconciler,
}

impl TriageService {
    /// Build the service and start the queue workers. Requires a Tokio runtime.
    pub fn new(orchestrator: Arc<TriageOrchestrator>, queue_config: QueueConfig) -> Self {
        let db = Arc::clone(orchestrator.db());
        let auditor = AuditReconciler::new(Arc::clone(&db), Arc::clone(orchestrator.ledger()));
        let queue = Arc::new(TriageQueue::start(Arc::clone(&orchestrator), queue_config));
        Self {
            db,
            orchestrator,
            queue,
            auditor,
        }
    }

    pub fn queue(&self) -> &Arc<TriageQueue> {
        &self.queue
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.db.stats()
    }

    pub fn file_complaint(&self, input: &NewComplaint) -> Result<i64> {
        let id = self.db.with_conn(|conn| complaints::insert_complaint(conn, input))?;
        info!(complaint_id = id, user_id = input.user_id, "Complaint filed");
        Ok(id)
    }

    /// Attach evidence; a content hash seen anywhere before is rejected.
    pub fn add_evidence(&self, input: &NewEvidence) -> Result<i64> {
        self.db.with_conn(|conn| {
            complaints::require_complaint(conn, input.complaint_id)?;
            evidence::insert_evidence(conn, input)
        })
    }

    pub fn add_department(&self, name: &str, description: &str) -> Result<i64> {
        self.db
            .with_conn(|conn| departments::upsert_department(conn, name, description))
    }

    pub fn get_complaint(&self, id: i64) -> Result<Complaint> {
        self.db.with_conn(|conn| complaints::require_complaint(conn, id))
    }

    /// Move to `processing` before the job runs.
    ///
    /// A completed complaint is re-analyzed from scratch; a failed one keeps
    /// its cached text triage.
    fn mark_processing(&self, id: i64) -> Result<AnalysisStatus> {
        self.db.with_conn(|conn| {
            let complaint = complaints::require_complaint(conn, id)?;
            match complaint.analysis_status {
                AnalysisStatus::Processing => {}
                AnalysisStatus::Completed => complaints::begin_analysis(conn, id, true)?,
                AnalysisStatus::Pending | AnalysisStatus::Failed => complaints::begin_analysis(conn, id, false)?,
            }
            Ok(complaint.analysis_status)
        })
    }

    /// Idempotent trigger. Returns whether a new job was queued.
    pub async fn request_analysis(&self, id: i64) -> Result<bool> {
        let previous = self.mark_processing(id)?;
        let queued = self.queue.enqueue(id).await?;
        info!(complaint_id = id, previous = %previous, queued, "Analysis requested");
        Ok(queued)
    }

    /// Trigger and wait for the outcome.
    pub async fn analyze_now(&self, id: i64) -> Result<TriageOutcome> {
        self.mark_processing(id)?;
        self.queue.run_and_wait(id).await
    }

    pub async fn get_audit_report(&self) -> Result<AuditReport> {
        self.auditor.report().await
    }

    pub async fn verify_integrity(&self, id: i64) -> Result<IntegrityReport> {
        self.auditor.verify_integrity(id).await
    }

    /// Anchor completed complaints whose earlier anchoring failed.
    pub async fn reanchor_pending(&self) -> Result<ReanchorSummary> {
        let pending = self.db.with_conn(complaints::list_unanchored)?;
        let mut summary = ReanchorSummary {
            attempted: pending.len(),
            ..Default::default()
        };

        for (id, digest) in pending {
            match self.orchestrator.anchor(id, &digest).await {
                Some(_) => summary.anchored.push(id),
                None => summary.still_pending.push(id),
            }
        }

        info!(
            attempted = summary.attempted,
            anchored = summary.anchored.len(),
            "Re-anchoring sweep finished"
        );
        Ok(summary)
    }

    /// Re-request analysis for every failed complaint. Returns the ids queued.
    pub async fn retry_failed(&self) -> Result<Vec<i64>> {
        let failed = self
            .db
            .with_conn(|conn| complaints::list_ids_by_analysis_status(conn, AnalysisStatus::Failed))?;

        let mut queued = Vec::new();
        for id in failed {
            match self.request_analysis(id).await {
                Ok(true) => queued.push(id),
                Ok(false) => {}
                Err(e) => warn!(complaint_id = id, error = %e, "Retry request failed"),
            }
        }
        Ok(queued)
    }

    /// Official edit of whitelisted fields, scoped to the official's department.
    ///
    /// A severity change alters the anchored facts, so the new digest is
    /// anchored in turn.
    pub async fn update_complaint(&self, subject: &Subject, id: i64, update: &ComplaintUpdate) -> Result<Complaint> {
        update.validate()?;

        let (updated, new_digest) = self.db.with_conn(|conn| {
            let current = complaints::require_complaint(conn, id)?;
            authorize_update(subject, &current)?;
            complaints::update_official_fields(conn, id, update.status, update.severity_score)?;

            let updated = complaints::require_complaint(conn, id)?;
            let severity_changed = updated.severity_score != current.severity_score;
            let new_digest = if severity_changed && current.analysis_status == AnalysisStatus::Completed {
                let digest = complaint_manifest(conn, &updated, updated.severity_score)?.digest();
                complaints::set_manifest_digest(conn, id, &digest)?;
                Some(digest)
            } else {
                None
            };
            Ok((updated, new_digest))
        })?;

        info!(
            complaint_id = id,
            subject_id = subject.id,
            status = %updated.status,
            severity = updated.severity_score,
            "Complaint updated by official"
        );

        if let Some(digest) = new_digest {
            self.orchestrator.anchor(id, &digest).await;
            return self.get_complaint(id);
        }
        Ok(updated)
    }

    /// Policy-compliant deletion; the audit reports it as archived.
    pub fn archive_complaint(&self, id: i64) -> Result<()> {
        self.db.with_conn(|conn| complaints::soft_delete(conn, id))?;
        info!(complaint_id = id, "Complaint archived");
        Ok(())
    }
}

