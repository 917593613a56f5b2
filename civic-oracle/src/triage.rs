//! Text triage oracle.
//!
//! One language-model call per complaint: category, severity, English
//! translation, summary, detected language and an urgency flag. A reply
//! that does not carry a usable category and severity is rejected; there
//! is no partial text score.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{CompletionRequest, LlmBackend};
use crate::error::{extract_json_object, truncate, OracleError};
use crate::retry::RetryPolicy;

const TRIAGE_SYSTEM_PROMPT: &str = "You are a civic grievance triage assistant. \
Read the complaint, which may be in any language, and reply with a single JSON object: \
{\"category\": string, \"severity\": integer 1-10, \"translated_title_en\": string, \
\"summary_en\": string, \"detected_language\": string, \"is_urgent\": boolean}. \
Severity 10 means immediate danger to life. Mark is_urgent only for threats to safety.";

/// Output of the text triage oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextTriage {
    pub category: String,
    /// Always within 1.0..=10.0, unrounded
    pub severity: f64,
    pub translated_title_en: String,
    pub summary_en: String,
    pub detected_language: String,
    pub is_urgent: bool,
}

/// Language-analysis oracle contract.
#[async_trait]
pub trait TextTriageOracle: Send + Sync {
    async fn triage(&self, title: &str, description: &str) -> Result<TextTriage, OracleError>;
}

/// Text triage over an LLM backend.
pub struct LlmTextTriage {
    backend: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
}

impl LlmTextTriage {
    pub fn new(backend: Arc<dyn LlmBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }
}

#[async_trait]
impl TextTriageOracle for LlmTextTriage {
    async fn triage(&self, title: &str, description: &str) -> Result<TextTriage, OracleError> {
        let text = format!("Title: {}\nDescription: {}", title, description);
        let request = CompletionRequest::user(text)
            .with_system(TRIAGE_SYSTEM_PROMPT)
            .with_temperature(0.0)
            .with_json_output();

        let response = self
            .retry
            .run("text_triage", || self.backend.complete(request.clone()))
            .await?;

        debug!(model = self.backend.id(), "Text triage reply received");
        parse_triage(&response.content)
    }
}

/// Parse and validate a triage reply.
pub fn parse_triage(content: &str) -> Result<TextTriage, OracleError> {
    let json = extract_json_object(content)?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| OracleError::Malformed(format!("invalid JSON ({}): {}", e, truncate(json, 120))))?;

    let category = value
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OracleError::Malformed("missing category".to_string()))?
        .to_string();

    let raw_severity = match value.get("severity") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| OracleError::Malformed("missing or non-numeric severity".to_string()))?;

    let severity = raw_severity.clamp(1.0, 10.0);
    if severity != raw_severity {
        warn!(raw_severity, severity, "Triage severity out of range, clamped");
    }

    let text_field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let is_urgent = match value.get("is_urgent") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    Ok(TextTriage {
        category,
        severity,
        translated_title_en: text_field("translated_title_en"),
        summary_en: text_field("summary_en"),
        detected_language: text_field("detected_language"),
        is_urgent,
    })
}
