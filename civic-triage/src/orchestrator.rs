//! Triage orchestrator: one background job per complaint
//!
//! ```text
//! processing ──► text triage ──► evidence ──► weighting ──► similarity + cluster
//!                                                               │
//!   completed ◄── digest + anchor ◄── clamp/round ◄── urgency ◄─┴── department
//! ```
//!
//! The text-oracle result is persisted as soon as it arrives so a retry of
//! a failed job does not repeat that call. The final score, status and
//! manifest digest are written together; anchoring comes afterwards and
//! its failure leaves the complaint scored but unanchored.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use civic_ledger::{ComplaintManifest, LedgerAdapter};
use civic_oracle::{DepartmentClassifier, DepartmentOption, TextTriage, TextTriageOracle, Transcriber, VisionOracle};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterEngine, ClusterOutcome};
use crate::db::{complaints, departments, evidence as evidence_db, Database};
use crate::error::TriageError;
use crate::evidence::EvidenceVerifier;
use crate::models::{AnalysisStatus, Complaint};
use crate::pipeline::{finalize_score, PipelineConfig};
use crate::similarity::SimilarityIndex;

/// The model-backed collaborators of a triage run
#[derive(Clone)]
pub struct Oracles {
    pub text: Arc<dyn TextTriageOracle>,
    pub vision: Arc<dyn VisionOracle>,
    pub departments: Arc<dyn DepartmentClassifier>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

/// Everything one completed run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageOutcome {
    pub complaint_id: i64,
    pub category: String,
    pub text_severity: f64,
    pub evidence_aggregate: Option<f64>,
    pub weighted_score: f64,
    pub cluster_id: Option<i64>,
    pub cluster_boost: f64,
    pub department_id: Option<i64>,
    pub is_urgent: bool,
    pub final_severity: u8,
    pub manifest_digest: String,
    /// `None` when anchoring failed; `reanchor_pending` retries it
    pub anchor_ref: Option<String>,
}

/// Manifest over a complaint's anchored facts with the given severity.
pub fn complaint_manifest(
    conn: &Connection,
    complaint: &Complaint,
    severity: u8,
) -> Result<ComplaintManifest, TriageError> {
    let hashes = evidence_db::hashes_for_complaint(conn, complaint.id)?;
    Ok(ComplaintManifest::new(complaint.id, complaint.description.clone(), severity, complaint.filed_at).with_evidence(hashes))
}

/// Sequences the triage stages for a complaint
pub struct TriageOrchestrator {
    db: Arc<Database>,
    ledger: Arc<dyn LedgerAdapter>,
    text_oracle: Arc<dyn TextTriageOracle>,
    classifier: Arc<dyn DepartmentClassifier>,
    evidence: EvidenceVerifier,
    clusters: ClusterEngine,
    config: PipelineConfig,
}

impl TriageOrchestrator {
    pub fn new(
        db: Arc<Database>,
        index: Arc<SimilarityIndex>,
        ledger: Arc<dyn LedgerAdapter>,
        oracles: Oracles,
        config: PipelineConfig,
        evidence_root: impl Into<PathBuf>,
    ) -> Self {
        let mut evidence = EvidenceVerifier::new(Arc::clone(&db), oracles.vision, evidence_root, &config);
        if let Some(transcriber) = oracles.transcriber {
            evidence = evidence.with_transcriber(transcriber);
        }
        let clusters = ClusterEngine::new(Arc::clone(&db), index, &config);

        Self {
            db,
            ledger,
            text_oracle: oracles.text,
            classifier: oracles.departments,
            evidence,
            clusters,
            config,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerAdapter> {
        &self.ledger
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the job for a complaint already moved to `processing`.
    ///
    /// A missing complaint exits without side effects. Any other failure
    /// marks the complaint `failed` and is returned to the caller.
    pub async fn run(&self, complaint_id: i64) -> Result<TriageOutcome, TriageError> {
        let complaint = match self.db.with_conn(|conn| complaints::get_complaint(conn, complaint_id))? {
            Some(complaint) => complaint,
            None => {
                warn!(complaint_id, "Complaint vanished before triage, dropping job");
                return Err(TriageError::NotFound(complaint_id));
            }
        };

        if complaint.analysis_status != AnalysisStatus::Processing {
            debug!(complaint_id, status = %complaint.analysis_status, "Not processing, skipping");
            return Err(TriageError::NotProcessing {
                id: complaint_id,
                status: complaint.analysis_status,
            });
        }

        info!(complaint_id, "Triage started");
        match self.execute(complaint, Utc::now()).await {
            Ok(outcome) => {
                info!(
                    complaint_id,
                    severity = outcome.final_severity,
                    cluster_id = ?outcome.cluster_id,
                    anchored = outcome.anchor_ref.is_some(),
                    "Triage completed"
                );
                Ok(outcome)
            }
            Err(TriageError::NotFound(id)) => {
                warn!(complaint_id = id, "Complaint deleted during triage");
                Err(TriageError::NotFound(id))
            }
            Err(e) => {
                error!(complaint_id, error = %e, retryable = e.is_retryable(), "Triage failed");
                if let Err(mark_err) = self
                    .db
                    .with_conn(|conn| complaints::set_analysis_status(conn, complaint_id, AnalysisStatus::Failed))
                {
                    warn!(complaint_id, error = %mark_err, "Could not mark complaint failed");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, complaint: Complaint, now: DateTime<Utc>) -> Result<TriageOutcome, TriageError> {
        let id = complaint.id;

        // 1. Text triage, reused from a previous failed attempt when cached
        let triage = match complaint.cached_triage.clone() {
            Some(cached) => {
                debug!(complaint_id = id, "Reusing cached text triage");
                cached
            }
            None => {
                let triage = self.text_oracle.triage(&complaint.title, &complaint.description).await?;
                self.db.with_conn(|conn| complaints::save_triage(conn, id, &triage))?;
                triage
            }
        };

        // 2-3. Evidence and weighting
        let report = self.evidence.verify(&complaint, now).await?;
        let weighted = self.config.combine(triage.severity, report.aggregate);

        // 4. Similarity and clustering
        let text = analysis_text(&complaint, &triage);
        let cluster: ClusterOutcome = self
            .clusters
            .detect(&complaint, &text, Some(&triage.category), weighted)
            .await?;
        let mut score = weighted + cluster.boost;

        // 5. Department, only while unassigned
        let department_id = match complaint.department_id {
            Some(existing) => Some(existing),
            None => self.assign_department(id, &text).await?,
        };

        // 6-7. Urgency floor, clamp and round
        score = self.config.apply_urgency(score, triage.is_urgent);
        let final_severity = finalize_score(score);

        // 8. Digest over finalized facts, then anchor
        let manifest_digest = self.db.with_conn(|conn| {
            let digest = complaint_manifest(conn, &complaint, final_severity)?.digest();
            complaints::finalize(conn, id, final_severity, &digest)?;
            Ok(digest)
        })?;
        let anchor_ref = self.anchor(id, &manifest_digest).await;

        Ok(TriageOutcome {
            complaint_id: id,
            category: triage.category,
            text_severity: triage.severity,
            evidence_aggregate: report.aggregate,
            weighted_score: weighted,
            cluster_id: cluster.cluster_id,
            cluster_boost: cluster.boost,
            department_id,
            is_urgent: triage.is_urgent,
            final_severity,
            manifest_digest,
            anchor_ref,
        })
    }

    /// Ask the classifier; an unusable reply or a failed call leaves it unassigned.
    async fn assign_department(&self, complaint_id: i64, text: &str) -> Result<Option<i64>, TriageError> {
        let options: Vec<DepartmentOption> = self
            .db
            .with_conn(departments::list_departments)?
            .into_iter()
            .map(|d| DepartmentOption::new(d.id, d.name, d.description))
            .collect();

        let choice = match self.classifier.classify(text, &options).await {
            Ok(choice) => choice,
            Err(e) => {
                warn!(complaint_id, error = %e, "Department classification failed, leaving unassigned");
                None
            }
        };

        match choice {
            Some(department_id) => {
                let assigned = self
                    .db
                    .with_conn(|conn| complaints::set_department_if_unassigned(conn, complaint_id, department_id))?;
                if assigned {
                    info!(complaint_id, department_id, "Department assigned");
                    Ok(Some(department_id))
                } else {
                    // An official routed it while the job ran
                    let current = self.db.with_conn(|conn| complaints::require_complaint(conn, complaint_id))?;
                    Ok(current.department_id)
                }
            }
            None => Ok(None),
        }
    }

    /// Anchor a digest and record the reference. Failures are logged and leave it unanchored.
    pub async fn anchor(&self, complaint_id: i64, digest: &str) -> Option<String> {
        match self.ledger.anchor(complaint_id, digest).await {
            Ok(tx_ref) => match self.db.with_conn(|conn| complaints::record_anchor(conn, complaint_id, &tx_ref)) {
                Ok(()) => {
                    info!(complaint_id, tx_ref = %tx_ref, ledger = self.ledger.id(), "Manifest anchored");
                    Some(tx_ref)
                }
                Err(e) => {
                    error!(complaint_id, tx_ref = %tx_ref, error = %e, "Anchored but reference not stored");
                    None
                }
            },
            Err(e) => {
                let e = TriageError::LedgerWrite(e);
                warn!(complaint_id, error = %e, "Anchoring failed, complaint left unanchored");
                None
            }
        }
    }
}

/// English text when the oracle produced it, otherwise the original.
fn analysis_text(complaint: &Complaint, triage: &TextTriage) -> String {
    let english = format!("{} {}", triage.translated_title_en, triage.summary_en);
    if english.trim().is_empty() {
        format!("{} {}", complaint.title, complaint.description)
    } else {
        english.trim().to_string()
    }
}
