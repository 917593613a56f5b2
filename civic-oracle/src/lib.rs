//! Civic Oracle - model-backed analysis for complaint triage
//!
//! Wraps language, vision, speech and embedding models behind narrow,
//! typed contracts so the triage pipeline never sees raw model output:
//! - Trait-based LLM backends (OpenAI-compatible, mock)
//! - Text triage: category, severity, translation, urgency
//! - Vision relevance checks for photo evidence
//! - Department classification
//! - Audio transcription and text embeddings
//! - Per-call timeout and retry policy
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────────────┐
//! │ TextTriage   │ │ Vision       │ │ Department           │
//! │ Oracle       │ │ Oracle       │ │ Classifier           │
//! └──────┬───────┘ └──────┬───────┘ └──────────┬───────────┘
//!        └────────────────┼────────────────────┘
//!                         ▼
//!                 ┌──────────────┐
//!                 │ RetryPolicy  │
//!                 └──────┬───────┘
//!                        ▼
//!                 ┌──────────────┐
//!                 │ LlmBackend   │
//!                 │ (OpenAI/Mock)│
//!                 └──────────────┘
//! ```

pub mod backend;
pub mod department;
pub mod embedding;
pub mod error;
pub mod retry;
pub mod transcribe;
pub mod triage;
pub mod vision;

// Re-export main types for convenience
pub use backend::traits::{CompletionRequest, CompletionResponse, ImageInput, LlmBackend, LlmError};
pub use department::{DepartmentClassifier, DepartmentOption, LlmDepartmentClassifier};
pub use embedding::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use error::OracleError;
pub use retry::RetryPolicy;
pub use transcribe::{OpenAiTranscriber, Transcriber};
pub use triage::{LlmTextTriage, TextTriage, TextTriageOracle};
pub use vision::{LlmVisionOracle, VisionOracle, VisionVerdict};
