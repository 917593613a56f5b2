//! Department classification oracle.
//!
//! The model sees every department as `ID: name (description)` and answers
//! with one id. Anything that is not a single known id means "leave the
//! complaint unassigned"; only a failed call is an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{CompletionRequest, LlmBackend};
use crate::error::{truncate, OracleError};
use crate::retry::RetryPolicy;

/// A classification target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentOption {
    pub id: i64,
    pub name: String,
    pub description: String,
}

impl DepartmentOption {
    pub fn new(id: i64, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait DepartmentClassifier: Send + Sync {
    /// Pick a department for the complaint text. `Ok(None)` when no choice could be read.
    async fn classify(
        &self,
        complaint_text: &str,
        departments: &[DepartmentOption],
    ) -> Result<Option<i64>, OracleError>;
}

pub struct LlmDepartmentClassifier {
    backend: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
}

impl LlmDepartmentClassifier {
    pub fn new(backend: Arc<dyn LlmBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }
}

/// One line per department: `ID: name (description)`.
pub fn format_department_list(departments: &[DepartmentOption]) -> String {
    departments
        .iter()
        .map(|d| format!("{}: {} ({})", d.id, d.name, d.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a department id out of a model reply.
///
/// Accepts `4`, `4.`, `ID: 4`, `"4"`; rejects anything with other words
/// and ids not in `departments`.
pub fn parse_department_choice(reply: &str, departments: &[DepartmentOption]) -> Option<i64> {
    let trimmed = reply.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
    let lowered = trimmed.to_ascii_lowercase();
    let rest = lowered
        .strip_prefix("id")
        .map(|r| r.trim_start().trim_start_matches(':').trim_start())
        .unwrap_or(lowered.as_str());

    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let tail = &rest[digits.len()..];
    if digits.is_empty() || !tail.chars().all(|c| c.is_ascii_punctuation() || c.is_whitespace()) {
        return None;
    }

    let id: i64 = digits.parse().ok()?;
    departments.iter().any(|d| d.id == id).then_some(id)
}

#[async_trait]
impl DepartmentClassifier for LlmDepartmentClassifier {
    async fn classify(
        &self,
        complaint_text: &str,
        departments: &[DepartmentOption],
    ) -> Result<Option<i64>, OracleError> {
        if departments.is_empty() {
            return Ok(None);
        }

        let prompt = format!(
            "Which department should handle this complaint?\n\nDepartments:\n{}\n\nComplaint: {}\n\n\
             Reply with the department ID number only.",
            format_department_list(departments),
            complaint_text
        );
        let request = CompletionRequest::user(prompt)
            .with_temperature(0.0)
            .with_max_tokens(8);

        let response = self
            .retry
            .run("department", || self.backend.complete(request.clone()))
            .await?;

        let choice = parse_department_choice(&response.content, departments);
        match choice {
            Some(id) => debug!(department_id = id, "Department classified"),
            None => info!(
                reply = %truncate(&response.content, 60),
                "Department reply not usable, leaving unassigned"
            ),
        }
        Ok(choice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn departments() -> Vec<DepartmentOption> {
        vec![
            DepartmentOption::new(1, "Public Works", "Roads, bridges, drains"),
            DepartmentOption::new(4, "Water Supply", "Pipelines and leaks"),
        ]
    }

    #[test]
    fn test_format_list() {
        assert_eq!(
            format_department_list(&departments()),
            "1: Public Works (Roads, bridges, drains)\n4: Water Supply (Pipelines and leaks)"
        );
    }

    #[test]
    fn test_parse_accepts_common_shapes() {
        let deps = departments();
        assert_eq!(parse_department_choice("4", &deps), Some(4));
        assert_eq!(parse_department_choice(" 4.\n", &deps), Some(4));
        assert_eq!(parse_department_choice("ID: 1", &deps), Some(1));
        assert_eq!(parse_department_choice("\"4\"", &deps), Some(4));
    }

    #[test]
    fn test_parse_rejects_unusable() {
        let deps = departments();
        assert_eq!(parse_department_choice("Water Supply", &deps), None);
        assert_eq!(parse_department_choice("4 or 1", &deps), None);
        assert_eq!(parse_department_choice("9", &deps), None);
        assert_eq!(parse_department_choice("", &deps), None);
    }

    #[tokio::test]
    async fn test_classify_unparseable_is_none() {
        let backend = Arc::new(MockBackend::default().with_response("Probably water?"));
        let classifier = LlmDepartmentClassifier::new(backend, RetryPolicy::default());
        assert_eq!(classifier.classify("leak", &departments()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_classify_sends_department_list() {
        let backend = Arc::new(MockBackend::default().with_response("4"));
        let classifier = LlmDepartmentClassifier::new(backend.clone(), RetryPolicy::default());
        assert_eq!(classifier.classify("pipe burst", &departments()).await.unwrap(), Some(4));
        assert!(backend.requests()[0].user_text().contains("4: Water Supply (Pipelines and leaks)"));
    }

    #[tokio::test]
    async fn test_classify_without_departments_skips_call() {
        let backend = Arc::new(MockBackend::default());
        let classifier = LlmDepartmentClassifier::new(backend.clone(), RetryPolicy::default());
        assert_eq!(classifier.classify("x", &[]).await.unwrap(), None);
        assert_eq!(backend.call_count(), 0);
    }
}
