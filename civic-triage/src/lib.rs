//! Civic Triage - background analysis for citizen complaints
//!
//! Turns a freshly filed complaint into a scored, routed, clustered and
//! ledger-anchored record, and answers audit questions about it later.
//!
//! ## Pipeline
//!
//! ```text
//! file_complaint ──► request_analysis ──► TriageQueue ──► TriageOrchestrator
//!                                                              │
//!     ┌──────────────┬──────────────┬──────────────┬───────────┤
//!     ▼              ▼              ▼              ▼           ▼
//! text oracle   evidence +     similarity +   department    manifest digest
//! (civic-oracle) vision oracle  cluster        classifier    + ledger anchor
//!                                                            (civic-ledger)
//! ```
//!
//! ## Storage
//!
//! - `civic-triage.db` - complaints, evidence, clusters, departments (rusqlite)
//! - `civic-similarity.db` - embedded complaint texts for nearest-neighbour lookup
//! - ledger - JSON-RPC gateway, or a local append-only journal
//!
//! ## Audit
//!
//! [`audit::AuditReconciler`] compares anchored ids with database rows to
//! detect hard deletion, and re-derives a complaint's digest to detect
//! tampering.

pub mod access;
pub mod audit;
pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod evidence;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod similarity;

// Re-exports
pub use access::{ComplaintUpdate, Role, Subject};
pub use audit::{AuditReconciler, AuditReport, AuditStatus, IntegrityReport};
pub use cluster::{ClusterEngine, ClusterOutcome};
pub use db::Database;
pub use error::TriageError;
pub use evidence::{EvidenceReport, EvidenceVerifier};
pub use models::{AnalysisStatus, Complaint, ComplaintStatus, FileType, NewComplaint, NewEvidence};
pub use orchestrator::{Oracles, TriageOrchestrator, TriageOutcome};
pub use pipeline::PipelineConfig;
pub use queue::{QueueConfig, QueueStats, TriageQueue};
pub use service::{ReanchorSummary, TriageService};
pub use similarity::{SimilarityIndex, SimilarityMatch, SimilarityMetadata};
